//! Control messages sent by UI surfaces to the engine

use serde::{Deserialize, Serialize};

use super::types::CapturedPage;
use crate::config::CaptureConfig;
use crate::export::ExportSummary;

/// Inbound control message, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlMessage {
    ToggleCapture {
        value: bool,
    },
    GetProgress,
    /// Build and deliver the workbook; `responses` defaults to the stored buffer
    #[serde(alias = "processAndDownloadExcel")]
    ProcessAndExport {
        #[serde(default)]
        responses: Option<Vec<CapturedPage>>,
        #[serde(rename = "needProcess", default)]
        need_process: bool,
    },
    /// Abandon a running export between batches
    CancelExport,
    /// Persist a capture config; takes effect on `ReloadConfig`
    SaveConfig {
        config: CaptureConfig,
    },
    ReloadConfig,
    GetConfig,
    GetResponses,
    ClearResponses,
}

/// Reply to a `ControlMessage`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ControlResponse {
    Ack {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Progress {
        message: String,
    },
    Config(CaptureConfig),
    Responses(Vec<CapturedPage>),
    Exported(ExportSummary),
}

impl ControlResponse {
    pub fn ok() -> Self {
        ControlResponse::Ack {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        ControlResponse::Ack {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_ui_messages() {
        let msg: ControlMessage =
            serde_json::from_value(json!({"type": "toggleCapture", "value": true})).unwrap();
        assert_eq!(msg, ControlMessage::ToggleCapture { value: true });

        let msg: ControlMessage = serde_json::from_value(json!({
            "type": "processAndDownloadExcel",
            "responses": [],
            "needProcess": true
        }))
        .unwrap();
        assert_eq!(
            msg,
            ControlMessage::ProcessAndExport {
                responses: Some(vec![]),
                need_process: true
            }
        );

        let msg: ControlMessage = serde_json::from_value(json!({"type": "getProgress"})).unwrap();
        assert_eq!(msg, ControlMessage::GetProgress);
    }

    #[test]
    fn ack_omits_missing_error() {
        assert_eq!(
            serde_json::to_value(ControlResponse::ok()).unwrap(),
            json!({"success": true})
        );
        assert_eq!(
            serde_json::to_value(ControlResponse::failed("boom")).unwrap(),
            json!({"success": false, "error": "boom"})
        );
    }
}
