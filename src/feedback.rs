// ============================================================================
// FEEDBACK CONTRACT - request/response shapes for the external critique service
// ============================================================================
//
// The engine only builds the request from its own export and interprets the
// reply; the transport lives behind `FeedbackClient`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireAnswers {
    pub subject: String,
    pub style: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artists: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub techniques: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_focus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    /// Base64 JPEG without a `data:` prefix.
    pub image_base64: String,
    pub questionnaire_answers: QuestionnaireAnswers,
}

const MISSING_FIELDS: &str = "Missing required fields: imageBase64 and questionnaireAnswers";

impl FeedbackRequest {
    pub fn new(image_base64: String, questionnaire_answers: QuestionnaireAnswers) -> Self {
        Self { image_base64, questionnaire_answers }
    }

    /// Same rule the service applies: both fields must be present.
    pub fn validate(&self) -> Result<(), FeedbackError> {
        if self.image_base64.trim().is_empty() {
            return Err(FeedbackError::InvalidRequest(MISSING_FIELDS.into()));
        }
        Ok(())
    }

    /// Parse a request body the way the service does, rejecting one whose
    /// image or answers are missing or empty.
    pub fn from_json(body: &str) -> Result<Self, FeedbackError> {
        let value: serde_json::Value =
            serde_json::from_str(body).map_err(|e| FeedbackError::InvalidRequest(e.to_string()))?;
        let has_image = value.get("imageBase64").and_then(|v| v.as_str()).is_some_and(|s| !s.is_empty());
        let has_answers = value.get("questionnaireAnswers").is_some_and(|v| v.is_object());
        if !has_image || !has_answers {
            return Err(FeedbackError::InvalidRequest(MISSING_FIELDS.into()));
        }
        serde_json::from_value(value).map_err(|e| FeedbackError::InvalidRequest(e.to_string()))
    }
}

/// A successful critique.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackReport {
    pub visual_analysis: String,
    pub feedback: String,
}

/// Body returned by the service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedbackResponse {
    Report(FeedbackReport),
    Error { error: String },
}

impl FeedbackResponse {
    /// Interpret an HTTP status and body.  Any non-2xx status is a failure,
    /// using the body's `error` field when there is one.
    pub fn from_http(status: u16, body: &str) -> Result<FeedbackReport, FeedbackError> {
        let parsed: Option<FeedbackResponse> = serde_json::from_str(body).ok();
        match (status, parsed) {
            (200..=299, Some(FeedbackResponse::Report(report))) => Ok(report),
            (200..=299, Some(FeedbackResponse::Error { error })) => {
                Err(FeedbackError::Service { status, message: error })
            }
            (200..=299, None) => Err(FeedbackError::MalformedResponse(body.chars().take(200).collect())),
            (_, Some(FeedbackResponse::Error { error })) => {
                Err(FeedbackError::Service { status, message: error })
            }
            (_, _) => {
                let message = format!("request failed with status {}", status);
                Err(FeedbackError::Service { status, message })
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedbackError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("feedback service error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("malformed feedback response: {0}")]
    MalformedResponse(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// The drawing could not be exported for the request.
    #[error("export failed: {0}")]
    Export(String),
}

impl FeedbackError {
    /// HTTP-style status for this failure.
    pub fn status(&self) -> u16 {
        match self {
            FeedbackError::InvalidRequest(_) => 400,
            FeedbackError::Service { status, .. } => *status,
            _ => 500,
        }
    }
}

/// Raw reply from a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// Transport seam for the critique service.
pub trait FeedbackClient {
    fn post(&self, request_json: &str) -> Result<HttpReply, FeedbackError>;
}

/// Validate, send and interpret one request.
pub fn submit(
    client: &dyn FeedbackClient,
    request: &FeedbackRequest,
) -> Result<FeedbackReport, FeedbackError> {
    request.validate()?;
    let body = serde_json::to_string(request).map_err(|e| FeedbackError::InvalidRequest(e.to_string()))?;
    let reply = client.post(&body)?;
    let result = FeedbackResponse::from_http(reply.status, &reply.body);
    if let Err(e) = &result {
        log::warn!("feedback request failed: {}", e);
    }
    result
}
