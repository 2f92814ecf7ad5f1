//! Envelope model for the motion-analysis wire protocol.
//!
//! ```json
//! {"cmd":"onTrajectoryAnalysis","code":1000,"msg":"",
//!  "data":{"action":"result","bizId":"B1","isFinish":true,"summary":{...}}}
//! ```
//!
//! `cmd` and `data.action` are matched ASCII case-insensitively. `data` is
//! kept as raw JSON until a handler asks for it, so an envelope with a bad
//! `data` shape still parses and can be reported precisely.

pub mod summary;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::constants::SUCCESS_CODE;
use crate::error::EnvelopeError;

pub use summary::{CprSummary, TrajectorySummary};

/// One parsed inbound message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    /// Command name, as sent.
    pub cmd: String,
    /// Result code; absent means success.
    #[serde(default, deserialize_with = "lenient_code")]
    pub code: Option<i64>,
    /// Server-provided message, usually set on failure.
    #[serde(default)]
    pub msg: Option<String>,
    /// Action payload, validated lazily by [`Envelope::data`].
    #[serde(default)]
    pub data: Option<Value>,
}

impl Envelope {
    /// Parse one envelope line.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::Malformed`] if the text is not a JSON object with a
    /// string `cmd`.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(text).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    /// Whether the server reported success.
    pub fn is_success(&self) -> bool {
        self.code.is_none_or(|code| code == SUCCESS_CODE)
    }

    /// `data.action` if it is readable, otherwise an empty string.
    ///
    /// Used for diagnostics where the payload may be broken.
    pub fn action_name(&self) -> &str {
        self.data
            .as_ref()
            .and_then(|data| data.get("action"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Decode the `data` object.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::MissingDataField`] if `data` is absent, not an object,
    /// or has no string `action`.
    pub fn data(&self) -> Result<EnvelopeData, EnvelopeError> {
        let missing = || EnvelopeError::MissingDataField {
            cmd: self.cmd.clone(),
            action: self.action_name().to_string(),
        };
        match &self.data {
            Some(value @ Value::Object(_)) => {
                EnvelopeData::deserialize(value).ok().ok_or_else(missing)
            }
            _ => Err(missing()),
        }
    }
}

/// Decoded `data` object.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeData {
    /// Sub-command inside the mode.
    pub action: String,
    /// Business id correlating `begin` with later messages.
    #[serde(default)]
    pub biz_id: Option<String>,
    /// Whether a `result` is final.
    #[serde(default)]
    pub is_finish: bool,
    /// Mode-specific result fields.
    #[serde(default)]
    pub summary: Option<Value>,
}

/// Known command families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Sterile-clamp trajectory analysis.
    Trajectory,
    /// Chest-compression analysis.
    Cpr,
    /// Z-shaped trajectory analysis.
    ZShape,
    /// One-shot application configuration acknowledgement.
    RescueAppConfig,
}

impl Command {
    /// Match a `cmd` value, accepting both the request name and its
    /// `on`-prefixed push form.
    pub fn parse(cmd: &str) -> Option<Self> {
        const TABLE: &[(&str, Command)] = &[
            ("trajectoryAnalysis", Command::Trajectory),
            ("onTrajectoryAnalysis", Command::Trajectory),
            ("cprAnalysis", Command::Cpr),
            ("onCprAnalysis", Command::Cpr),
            ("zshapeTrajectoryAnalysis", Command::ZShape),
            ("onZshapeTrajectoryAnalysis", Command::ZShape),
            ("rescueAppConfig", Command::RescueAppConfig),
            ("onRescueAppConfig", Command::RescueAppConfig),
        ];
        let cmd = cmd.trim();
        TABLE
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(cmd))
            .map(|(_, command)| *command)
    }
}

/// Actions inside an analysis command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Analysis started.
    Begin,
    /// Analysis stopped (trajectory naming).
    Stop,
    /// Analysis ended (CPR naming).
    End,
    /// Tracker echo; acknowledged only.
    TrReport,
    /// Interim or final result.
    Result,
}

impl Action {
    /// Match an action name case-insensitively.
    pub fn parse(action: &str) -> Option<Self> {
        let action = action.trim();
        [
            ("begin", Self::Begin),
            ("stop", Self::Stop),
            ("end", Self::End),
            ("trReport", Self::TrReport),
            ("result", Self::Result),
        ]
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(action))
        .map(|(_, action)| action)
    }
}

/// Accept `1000`, `1000.0` or `"1000"`; anything else reads as absent.
fn lenient_code<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_envelope() {
        let env = Envelope::parse(
            r#"{"cmd":"trajectoryAnalysis","code":1000,"msg":"ok","data":{"action":"begin","bizId":"B1"}}"#,
        )
        .expect("valid envelope");
        assert_eq!(env.cmd, "trajectoryAnalysis");
        assert!(env.is_success());
        assert_eq!(env.msg.as_deref(), Some("ok"));

        let data = env.data().expect("data");
        assert_eq!(data.action, "begin");
        assert_eq!(data.biz_id.as_deref(), Some("B1"));
        assert!(!data.is_finish);
    }

    #[test]
    fn test_missing_code_is_success() {
        let env = Envelope::parse(r#"{"cmd":"onCprAnalysis"}"#).expect("valid");
        assert_eq!(env.code, None);
        assert!(env.is_success());
    }

    #[test]
    fn test_code_variants() {
        let float = Envelope::parse(r#"{"cmd":"x","code":1000.0}"#).expect("float code");
        assert_eq!(float.code, Some(1000));
        let text = Envelope::parse(r#"{"cmd":"x","code":"2001"}"#).expect("string code");
        assert_eq!(text.code, Some(2001));
        assert!(!text.is_success());
        let null = Envelope::parse(r#"{"cmd":"x","code":null}"#).expect("null code");
        assert_eq!(null.code, None);
    }

    #[test]
    fn test_malformed_inputs() {
        for text in ["not json", "[1,2]", r#"{"code":1000}"#, r#"{"cmd":5}"#, "{\"cmd\":\"x\""] {
            assert!(
                matches!(Envelope::parse(text), Err(EnvelopeError::Malformed(_))),
                "{text} should be malformed"
            );
        }
    }

    #[test]
    fn test_bad_data_shape_is_missing_field() {
        let env = Envelope::parse(r#"{"cmd":"onCprAnalysis","data":"oops"}"#).expect("parses");
        assert_eq!(
            env.data(),
            Err(EnvelopeError::MissingDataField {
                cmd: "onCprAnalysis".to_string(),
                action: String::new(),
            })
        );

        let env =
            Envelope::parse(r#"{"cmd":"onCprAnalysis","data":{"bizId":"B"}}"#).expect("parses");
        assert!(env.data().is_err(), "action is required");

        let text = r#"{"cmd":"onCprAnalysis","data":{"action":"result","isFinish":"yes"}}"#;
        let env = Envelope::parse(text).expect("parses");
        assert_eq!(
            env.data(),
            Err(EnvelopeError::MissingDataField {
                cmd: "onCprAnalysis".to_string(),
                action: "result".to_string(),
            })
        );
    }

    #[test]
    fn test_command_names_case_insensitive() {
        assert_eq!(Command::parse("TRAJECTORYANALYSIS"), Some(Command::Trajectory));
        assert_eq!(Command::parse("onTrajectoryAnalysis"), Some(Command::Trajectory));
        assert_eq!(Command::parse("oncpranalysis"), Some(Command::Cpr));
        assert_eq!(Command::parse("onZshapeTrajectoryAnalysis"), Some(Command::ZShape));
        assert_eq!(Command::parse("rescueAppConfig"), Some(Command::RescueAppConfig));
        assert_eq!(Command::parse("onSomethingElse"), None);
    }

    #[test]
    fn test_action_names_case_insensitive() {
        assert_eq!(Action::parse("BEGIN"), Some(Action::Begin));
        assert_eq!(Action::parse("trreport"), Some(Action::TrReport));
        assert_eq!(Action::parse("End"), Some(Action::End));
        assert_eq!(Action::parse("pause"), None);
    }
}
