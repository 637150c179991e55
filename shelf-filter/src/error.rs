use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
	#[error("Store not initialized: call store/initialize first")]
	NotInitialized,
	#[error("Invalid params: {0}")]
	InvalidParams(String),
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Storage error: {0}")]
	Storage(String),
}

impl FilterError {
	pub fn code(&self) -> &str {
		match self {
			Self::NotInitialized => "FILTER_NOT_INITIALIZED",
			Self::InvalidParams(_) => "FILTER_INVALID_PARAMS",
			Self::Io(_) => "FILTER_IO",
			Self::Serialization(_) => "FILTER_SERIALIZATION",
			Self::Storage(_) => "FILTER_STORAGE",
		}
	}

	pub fn to_json_rpc_error(&self) -> serde_json::Value {
		serde_json::json!({
			"filterCode": self.code(),
			"message": self.to_string(),
		})
	}
}
