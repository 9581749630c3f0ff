use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidJson,
    ConfigInvalidYaml,
    ConfigInvalidValue,

    ValidationInvalidArgument,
    ValidationMultipleErrors,

    TaskNotFound,
    FunctionNotFound,
    VariantNotFound,

    CommandUnsupported,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidYaml => "config.invalid_yaml",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",
            ErrorCode::ValidationMultipleErrors => "validation.multiple_errors",

            ErrorCode::TaskNotFound => "descriptor.task_not_found",
            ErrorCode::FunctionNotFound => "descriptor.function_not_found",
            ErrorCode::VariantNotFound => "descriptor.variant_not_found",

            ErrorCode::CommandUnsupported => "command.unsupported",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidDocumentDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDetails {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_by: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
        }
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            id,
            tried,
        });

        Self::new(ErrorCode::ValidationInvalidArgument, problem, details)
    }

    /// Wrap a list of validation problems. `details` is the serialized report.
    pub fn validation_multiple_errors(count: usize, details: Value) -> Self {
        Self::new(
            ErrorCode::ValidationMultipleErrors,
            format!("Descriptor has {} validation error(s)", count),
            details,
        )
        .with_hint("Run 'evgpipe validate <file>' to see every problem")
    }

    pub fn task_not_found(id: impl Into<String>, referenced_by: Option<String>) -> Self {
        let id = id.into();
        Self::new(
            ErrorCode::TaskNotFound,
            format!("Task '{}' not found", id),
            to_details(NotFoundDetails { id, referenced_by }),
        )
        .with_hint("Run 'evgpipe list <file>' to see available tasks")
    }

    pub fn function_not_found(id: impl Into<String>, referenced_by: Option<String>) -> Self {
        let id = id.into();
        Self::new(
            ErrorCode::FunctionNotFound,
            format!("Function '{}' not found", id),
            to_details(NotFoundDetails { id, referenced_by }),
        )
    }

    pub fn variant_not_found(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(
            ErrorCode::VariantNotFound,
            format!("Build variant '{}' not found", id),
            to_details(NotFoundDetails {
                id,
                referenced_by: None,
            }),
        )
        .with_hint("Run 'evgpipe list <file>' to see available build variants")
    }

    pub fn command_unsupported(command: impl Into<String>) -> Self {
        let command = command.into();
        Self::new(
            ErrorCode::CommandUnsupported,
            format!("Command '{}' is not supported by the local runner", command),
            serde_json::json!({ "command": command }),
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            to_details(ConfigInvalidDocumentDetails {
                path: path.into(),
                error: err.to_string(),
            }),
        )
    }

    pub fn config_invalid_yaml(path: impl Into<String>, err: serde_yml::Error) -> Self {
        let path = path.into();
        Self::new(
            ErrorCode::ConfigInvalidYaml,
            format!("Invalid YAML in {}", path),
            to_details(ConfigInvalidDocumentDetails {
                path,
                error: err.to_string(),
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            to_details(ConfigInvalidValueDetails {
                key: key.into(),
                value,
                problem: problem.into(),
            }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalIoErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            to_details(InternalJsonErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_dotted() {
        assert_eq!(ErrorCode::TaskNotFound.as_str(), "descriptor.task_not_found");
        assert_eq!(ErrorCode::ConfigInvalidYaml.as_str(), "config.invalid_yaml");
    }

    #[test]
    fn task_not_found_carries_reference_and_hint() {
        let err = Error::task_not_found("deploy", Some("buildvariants.ubuntu".to_string()));
        assert_eq!(err.code, ErrorCode::TaskNotFound);
        assert_eq!(err.details["id"], "deploy");
        assert_eq!(err.details["referencedBy"], "buildvariants.ubuntu");
        assert_eq!(err.hints.len(), 1);
    }

    #[test]
    fn invalid_argument_uses_problem_as_message() {
        let err = Error::validation_invalid_argument("jobs", "must be at least 1", None, None);
        assert_eq!(err.message, "must be at least 1");
        assert_eq!(err.details["field"], "jobs");
    }
}
