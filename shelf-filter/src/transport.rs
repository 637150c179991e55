// ---------------------------------------------------------------------------
// NDJSON transport
// ---------------------------------------------------------------------------
//
// Every outgoing message (response, error, notification) is one JSON object
// on one line of stdout. A line is encoded in full before it is written, so
// a serialization failure never leaves half a message on the wire.
// ---------------------------------------------------------------------------

use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;

use crate::error::FilterError;
use crate::protocol::FILTERS_CHANGED;
use crate::store::FilterChange;
use crate::types::FilterSet;

const JSONRPC_VERSION: &str = "2.0";

/// One outgoing JSON-RPC message. Responses carry `id` plus `result` or
/// `error`; notifications carry `method` and `params`.
#[derive(Debug, Serialize)]
struct Outgoing<'a, P: Serialize> {
	jsonrpc: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	id: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	method: Option<&'a str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	params: Option<P>,
	#[serde(skip_serializing_if = "Option::is_none")]
	result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	error: Option<ErrorBody>,
}

impl<'a, P: Serialize> Outgoing<'a, P> {
	fn reply(id: u64) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION,
			id: Some(id),
			method: None,
			params: None,
			result: None,
			error: None,
		}
	}

	fn notify(method: &'a str, params: P) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION,
			id: None,
			method: Some(method),
			params: Some(params),
			result: None,
			error: None,
		}
	}
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	code: i32,
	message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	data: Option<Value>,
}

/// Payload of a `filters/changed` notification.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FiltersChanged<'a> {
	collection_id: &'a str,
	filters: &'a FilterSet,
}

/// Serialize `message` as a single newline-terminated line.
fn encode_line(message: &impl Serialize) -> Result<Vec<u8>, FilterError> {
	let mut line = serde_json::to_vec(message)
		.map_err(|e| FilterError::Serialization(format!("Failed to encode message: {}", e)))?;
	line.push(b'\n');
	Ok(line)
}

/// Stateless stdout writer; `Copy` so store listeners can hold their own.
#[derive(Debug, Clone, Copy, Default)]
pub struct NdjsonTransport;

impl NdjsonTransport {
	pub fn new() -> Self {
		Self
	}

	pub fn write_response(&self, id: u64, result: Value) {
		let message = Outgoing::<()> {
			result: Some(result),
			..Outgoing::reply(id)
		};
		self.send(&message, "response");
	}

	pub fn write_error(&self, id: u64, code: i32, message: impl Into<String>, data: Option<Value>) {
		let message = Outgoing::<()> {
			error: Some(ErrorBody {
				code,
				message: message.into(),
				data,
			}),
			..Outgoing::reply(id)
		};
		self.send(&message, "error");
	}

	/// Announce a committed filter mutation.
	pub fn notify_filters_changed(&self, change: &FilterChange) {
		let params = FiltersChanged {
			collection_id: &change.collection_id,
			filters: &change.filters,
		};
		self.send(&Outgoing::notify(FILTERS_CHANGED, params), FILTERS_CHANGED);
	}

	fn send(&self, message: &impl Serialize, kind: &str) {
		if let Err(e) = self.try_send(message) {
			tracing::error!(kind, error = %e, "Failed to write message");
		}
	}

	fn try_send(&self, message: &impl Serialize) -> Result<(), FilterError> {
		let line = encode_line(message)?;
		let mut stdout = io::stdout().lock();
		stdout.write_all(&line)?;
		stdout.flush()?;
		Ok(())
	}
}
