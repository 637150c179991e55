// ---------------------------------------------------------------------------
// Integration tests for the shelf-filter-engine stdio protocol
// ---------------------------------------------------------------------------
//
// Each test drives a freshly spawned engine over NDJSON. Responses are
// matched to requests by id; `filters/changed` notifications that arrive in
// between are queued and can be drained with `take_notifications`.
// ---------------------------------------------------------------------------

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Engine session
// ---------------------------------------------------------------------------

struct Engine {
	child: Child,
	stdin: Option<ChildStdin>,
	stdout: BufReader<ChildStdout>,
	last_id: u64,
	pending: VecDeque<Value>,
}

impl Engine {
	fn start() -> Self {
		let mut child = Command::new(env!("CARGO_BIN_EXE_shelf-filter-engine"))
			.env_remove("SHELF_FILTER_STORAGE_DIR")
			.env_remove("SHELF_FILTER_STORAGE_KEY")
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::null())
			.spawn()
			.expect("engine binary should start");
		let stdin = child.stdin.take();
		let stdout = BufReader::new(child.stdout.take().expect("piped stdout"));
		Self {
			child,
			stdin,
			stdout,
			last_id: 0,
			pending: VecDeque::new(),
		}
	}

	/// Next non-blank line from the engine, parsed.
	fn read_message(&mut self) -> Value {
		let mut line = String::new();
		loop {
			line.clear();
			let read = self.stdout.read_line(&mut line).expect("readable stdout");
			assert!(read > 0, "engine closed stdout");
			if !line.trim().is_empty() {
				return serde_json::from_str(line.trim())
					.unwrap_or_else(|e| panic!("engine wrote invalid JSON ({e}): {line}"));
			}
		}
	}

	/// Send one request and wait for its reply: `Ok(result)` or `Err(error)`.
	fn request(&mut self, method: &str, params: Value) -> Result<Value, Value> {
		self.last_id += 1;
		let id = self.last_id;
		let mut frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
			.to_string();
		frame.push('\n');
		let stdin = self.stdin.as_mut().expect("stdin open");
		stdin.write_all(frame.as_bytes()).unwrap();
		stdin.flush().unwrap();

		loop {
			let mut message = self.read_message();
			let Some(reply_id) = message.get("id").and_then(Value::as_u64) else {
				self.pending.push_back(message);
				continue;
			};
			assert_eq!(reply_id, id, "replies must arrive in request order");
			if let Some(error) = message.get_mut("error") {
				return Err(error.take());
			}
			return Ok(message["result"].take());
		}
	}

	fn call(&mut self, method: &str, params: Value) -> Value {
		self.request(method, params)
			.unwrap_or_else(|e| panic!("{method} failed: {e}"))
	}

	fn call_err(&mut self, method: &str, params: Value) -> Value {
		match self.request(method, params) {
			Err(error) => error,
			Ok(result) => panic!("{method} unexpectedly succeeded: {result}"),
		}
	}

	/// Notifications received so far, oldest first.
	fn take_notifications(&mut self, method: &str) -> Vec<Value> {
		self.pending
			.drain(..)
			.filter(|n| n["method"] == method)
			.map(|mut n| n["params"].take())
			.collect()
	}

	fn initialize(&mut self) -> Value {
		self.call("store/initialize", json!({}))
	}

	fn initialize_with_dir(&mut self, dir: &str) -> Value {
		self.call("store/initialize", json!({ "storageDir": dir }))
	}
}

impl Drop for Engine {
	fn drop(&mut self) {
		// Closing stdin ends the read loop
		self.stdin.take();
		let _ = self.child.wait();
	}
}

fn scenario_items() -> Value {
	json!([
		{ "id": "1", "name": "Alpha", "year": 2020, "country": "US" },
		{ "id": "2", "name": "Beta", "year": 2021, "country": "JP" },
		{ "id": "3", "name": "Binder", "type": "collection", "year": 2020, "country": "US" },
		{ "id": "4", "name": "Delta", "year": null, "country": "US" }
	])
}

fn ids(items: &Value) -> Vec<&str> {
	items
		.as_array()
		.expect("items should be array")
		.iter()
		.map(|item| item["id"].as_str().unwrap())
		.collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn store_methods_require_initialize() {
	let mut engine = Engine::start();
	let err = engine.call_err("filters/get", json!({ "collectionId": "col" }));
	assert_eq!(err["code"], -32000);
	assert_eq!(err["data"]["filterCode"], "FILTER_NOT_INITIALIZED");
}

#[test]
fn unknown_method_is_rejected() {
	let mut engine = Engine::start();
	let err = engine.call_err("filters/explode", json!({}));
	assert_eq!(err["code"], -32601);
}

#[test]
fn malformed_params_are_invalid_params() {
	let mut engine = Engine::start();
	engine.initialize();
	let err = engine.call_err("filters/clearAll", json!({ "collection": "col" }));
	assert_eq!(err["code"], -32602);
	assert_eq!(err["data"]["filterCode"], "FILTER_INVALID_PARAMS");
}

#[test]
fn update_and_clear_fields() {
	let mut engine = Engine::start();
	engine.initialize();

	engine.call(
		"filters/updateField",
		json!({ "collectionId": "col", "field": "year", "values": ["2020"] }),
	);
	engine.call(
		"filters/updateField",
		json!({ "collectionId": "col", "field": "_text_search", "values": "holo" }),
	);
	let result = engine.call("filters/get", json!({ "collectionId": "col", "includeInherited": false }));
	assert_eq!(
		result["filters"],
		json!({ "year": ["2020"], "_text_search": "holo" })
	);
	let result = engine.call("filters/activeCount", json!({ "collectionId": "col" }));
	assert_eq!(result["count"], 2);

	engine.call("filters/clearField", json!({ "collectionId": "col", "field": "_text_search" }));
	engine.call(
		"filters/updateField",
		json!({ "collectionId": "col", "field": "year", "values": [] }),
	);
	let result = engine.call("filters/hasOwn", json!({ "collectionId": "col" }));
	assert_eq!(result["hasFilters"], false);
	let result = engine.call("filters/collections", json!({}));
	assert_eq!(result["collections"], json!([]));
}

#[test]
fn set_then_clear_all() {
	let mut engine = Engine::start();
	engine.initialize();

	engine.call(
		"filters/set",
		json!({ "collectionId": "col", "filters": { "year": ["2020"], "country": ["US"] } }),
	);
	let result = engine.call("filters/get", json!({ "collectionId": "col", "includeInherited": false }));
	assert_eq!(result["filters"], json!({ "year": ["2020"], "country": ["US"] }));

	engine.call("filters/clearAll", json!({ "collectionId": "col" }));
	let result = engine.call("filters/get", json!({ "collectionId": "col", "includeInherited": false }));
	assert_eq!(result["filters"], json!({}));
}

#[test]
fn inheritance_down_ancestor_chain() {
	let mut engine = Engine::start();
	engine.initialize();

	engine.call("filters/set", json!({ "collectionId": "A", "filters": { "country": ["US"] } }));
	engine.call("filters/set", json!({ "collectionId": "B", "filters": { "year": ["2020"] } }));
	engine.call(
		"filters/set",
		json!({ "collectionId": "C", "filters": { "attributes.rarity": ["Rare"] } }),
	);
	engine.call(
		"store/setActiveCollection",
		json!({ "collectionId": "C", "ancestorChain": ["A", "B"] }),
	);

	let result = engine.call("filters/get", json!({ "collectionId": "C" }));
	assert_eq!(
		result["filters"],
		json!({ "country": ["US"], "year": ["2020"], "attributes.rarity": ["Rare"] })
	);

	engine.call(
		"filters/updateField",
		json!({ "collectionId": "C", "field": "year", "values": ["2021"] }),
	);
	let result = engine.call("filters/get", json!({ "collectionId": "C" }));
	assert_eq!(result["filters"]["year"], json!(["2021"]));

	let result = engine.call("filters/hasEffective", json!({ "collectionId": "D" }));
	assert_eq!(result["hasFilters"], true);
	let result = engine.call("filters/hasOwn", json!({ "collectionId": "D" }));
	assert_eq!(result["hasFilters"], false);

	// Chain members read through the whole chain too
	let result = engine.call("filters/get", json!({ "collectionId": "A" }));
	assert_eq!(result["filters"], json!({ "country": ["US"], "year": ["2020"] }));
}

#[test]
fn committed_mutations_notify() {
	let mut engine = Engine::start();
	engine.initialize();

	engine.call(
		"filters/updateField",
		json!({ "collectionId": "col", "field": "year", "values": ["2020"] }),
	);
	engine.call("filters/clearAll", json!({ "collectionId": "col" }));

	// Notifications precede the response of the request that caused them
	let changes = engine.take_notifications("filters/changed");
	assert_eq!(
		changes,
		vec![
			json!({ "collectionId": "col", "filters": { "year": ["2020"] } }),
			json!({ "collectionId": "col", "filters": {} }),
		]
	);
	assert!(engine.take_notifications("filters/changed").is_empty());
}

#[test]
fn filters_survive_restart() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().to_str().unwrap().to_string();

	{
		let mut engine = Engine::start();
		engine.initialize_with_dir(&path);
		engine.call(
			"filters/set",
			json!({ "collectionId": "col", "filters": { "year": ["2020", "2021"] } }),
		);
	}

	assert!(dir.path().join("collectionFilters.json").exists());

	let mut engine = Engine::start();
	let result = engine.initialize_with_dir(&path);
	assert_eq!(result["collections"], 1);
	let result = engine.call("filters/get", json!({ "collectionId": "col", "includeInherited": false }));
	assert_eq!(result["filters"], json!({ "year": ["2020", "2021"] }));
}

#[test]
fn corrupt_store_starts_empty() {
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(dir.path().join("collectionFilters.json"), "{ not json").unwrap();

	let mut engine = Engine::start();
	let result = engine.initialize_with_dir(dir.path().to_str().unwrap());
	assert_eq!(result["collections"], 0);
}

#[test]
fn items_filter_keeps_collections_with_missing_values() {
	let mut engine = Engine::start();
	let result = engine.call(
		"items/filter",
		json!({ "items": scenario_items(), "filters": { "year": ["2020"] } }),
	);
	assert_eq!(ids(&result["items"]), vec!["1", "3"]);
	assert_eq!(result["count"], 2);
}

#[test]
fn items_filter_uses_effective_store_filters() {
	let mut engine = Engine::start();
	engine.initialize();
	engine.call("filters/set", json!({ "collectionId": "A", "filters": { "country": ["US"] } }));
	engine.call("store/setActiveCollection", json!({ "collectionId": "C", "ancestorChain": ["A"] }));
	engine.call("filters/set", json!({ "collectionId": "C", "filters": { "_text_search": "ta" } }));

	let result = engine.call(
		"items/filter",
		json!({ "items": scenario_items(), "collectionId": "C" }),
	);
	assert_eq!(ids(&result["items"]), vec!["4"]);
}

#[test]
fn items_matches_with_ownership() {
	let mut engine = Engine::start();
	let params = |owned: Value| {
		json!({
			"item": { "id": "1", "name": "Alpha" },
			"filters": { "ownership": ["missing"] },
			"ownedIds": owned,
		})
	};
	let result = engine.call("items/matches", params(json!(["1"])));
	assert_eq!(result["matches"], false);
	let result = engine.call("items/matches", params(json!(["2"])));
	assert_eq!(result["matches"], true);
}

#[test]
fn facet_counts() {
	let mut engine = Engine::start();
	let result = engine.call(
		"facets/count",
		json!({ "items": scenario_items(), "field": "year" }),
	);
	assert_eq!(result["counts"], json!({ "2020": 2, "2021": 1 }));

	let result = engine.call(
		"facets/count",
		json!({
			"items": scenario_items(),
			"fields": ["country", "ownership"],
			"ownedIds": ["1", "2"]
		}),
	);
	assert_eq!(result["facets"]["country"], json!({ "US": 3, "JP": 1 }));
	assert_eq!(result["facets"]["ownership"], json!({ "owned": 2, "missing": 2 }));

	let err = engine.call_err("facets/count", json!({ "items": [] }));
	assert_eq!(err["code"], -32602);
}

#[test]
fn catalog_infers_fields_at_root() {
	let mut engine = Engine::start();
	let items = json!([
		{ "id": "1", "name": "A", "attributes": { "card_set": "Base", "rarity": "Rare" } },
		{ "id": "2", "name": "B", "attributes": { "card_set": "Jungle" } }
	]);
	let result = engine.call(
		"catalog/build",
		json!({ "items": items, "isRoot": true, "withCounts": true }),
	);
	let fields = result["fields"].as_array().unwrap();
	assert_eq!(fields.len(), 2);
	assert_eq!(fields[0]["field"], "attributes.card_set");
	assert_eq!(fields[0]["label"], "Card Set");
	assert_eq!(fields[0]["values"], json!(["Base", "Jungle"]));
	assert_eq!(result["cached"], false);
	assert_eq!(result["counts"]["attributes.rarity"], json!({ "Rare": 1 }));

	let result = engine.call("catalog/build", json!({ "items": items, "isRoot": true }));
	assert_eq!(result["cached"], true);

	let result = engine.call("catalog/build", json!({ "items": items, "isRoot": false }));
	assert_eq!(result["fields"], json!([]));
}

#[test]
fn catalog_discards_stale_remote_metadata() {
	let mut engine = Engine::start();
	let remote = |label: &str| {
		json!([{ "field": "year", "label": label, "type": "multiselect", "values": ["2020"], "priority": 5 }])
	};

	engine.call("catalog/beginRemote", json!({ "collectionId": "A" }));
	engine.call("catalog/beginRemote", json!({ "collectionId": "B" }));
	let result = engine.call(
		"catalog/applyRemote",
		json!({ "collectionId": "A", "fields": remote("Year (A)") }),
	);
	assert_eq!(result["accepted"], false);
	let result = engine.call(
		"catalog/applyRemote",
		json!({ "collectionId": "B", "fields": remote("Year (B)") }),
	);
	assert_eq!(result["accepted"], true);

	let result = engine.call(
		"catalog/build",
		json!({
			"items": [],
			"collectionId": "B",
			"isAuthenticated": true,
			"ownedIds": [],
			"ancestorCollections": [
				{ "id": "P", "name": "Parent", "attributes": { "item_ids": ["1"] } }
			]
		}),
	);
	let fields: Vec<&str> = result["fields"]
		.as_array()
		.unwrap()
		.iter()
		.map(|f| f["field"].as_str().unwrap())
		.collect();
	assert_eq!(fields, vec!["ownership", "parent_collections", "year"]);
	assert_eq!(result["fields"][2]["label"], "Year (B)");
}
