//! Messages posted between the page and its background worker.

use serde::{Deserialize, Serialize};

use crate::version::VersionDescriptor;

/// Command posted by the page to the controlling worker.
///
/// Commands are discriminated by a `command` field:
/// ```json
/// { "command": "report-your-version" }
/// { "command": "begin-synchronized-clock", "startTimeMillis": 1700000000000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum WorkerCommand {
	/// Asks the worker to report its code version. Safe to repeat; the worker
	/// answers each one with a [`WorkerReply::MyVersionIs`].
	#[serde(rename = "report-your-version")]
	ReportYourVersion,
	/// Starts the worker's half of the synchronized virtual clock.
	#[serde(rename = "begin-synchronized-clock")]
	BeginSynchronizedClock {
		#[serde(rename = "startTimeMillis")]
		start_time_millis: u64,
	},
}

/// Reply posted by the worker back to the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply")]
pub enum WorkerReply {
	/// Answer to [`WorkerCommand::ReportYourVersion`].
	#[serde(rename = "my-version-is")]
	MyVersionIs { version: VersionDescriptor },
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn version_query_wire_shape() {
		let value = serde_json::to_value(WorkerCommand::ReportYourVersion).unwrap();
		assert_eq!(value, json!({ "command": "report-your-version" }));
	}

	#[test]
	fn clock_start_wire_shape() {
		let value = serde_json::to_value(WorkerCommand::BeginSynchronizedClock {
			start_time_millis: 1_700_000_000_000,
		})
		.unwrap();
		assert_eq!(
			value,
			json!({
				"command": "begin-synchronized-clock",
				"startTimeMillis": 1_700_000_000_000u64,
			})
		);
	}

	#[test]
	fn version_reply_round_trips() {
		let reply = WorkerReply::MyVersionIs {
			version: VersionDescriptor::new("abc", "v9"),
		};
		let value = serde_json::to_value(&reply).unwrap();
		assert_eq!(value, json!({ "reply": "my-version-is", "version": "abc|v9" }));
		let back: WorkerReply = serde_json::from_value(value).unwrap();
		assert_eq!(back, reply);
	}
}
