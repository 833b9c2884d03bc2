use crate::{
    Result,
    constants::{
        ATTENDANCE_TOPIC_ROOT, CONTROL_TOPIC_LEAF, CONTROL_TOPIC_ROOT, DEFAULT_DEVICE_ID,
        MARKED_BY_FACE, MARKED_BY_RFID, MAX_DEVICE_ID_LENGTH, MAX_SUBJECT_ID_LENGTH,
    },
    error::Error,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kiosk identifier embedded in control and response topics.
///
/// Topic separators and wildcards are rejected so a device id can never
/// widen a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new device ID with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeviceId` if the ID is empty, too long, or
    /// contains `/`, `+`, `#` or whitespace.
    pub fn new(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() || id.len() > MAX_DEVICE_ID_LENGTH {
            return Err(Error::InvalidDeviceId(format!(
                "Device ID must be 1-{MAX_DEVICE_ID_LENGTH} chars, got {:?}",
                id
            )));
        }
        if id
            .chars()
            .any(|c| matches!(c, '/' | '+' | '#') || c.is_whitespace())
        {
            return Err(Error::InvalidDeviceId(format!(
                "Device ID must not contain topic separators or wildcards: {id}"
            )));
        }
        Ok(DeviceId(id.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        DeviceId(DEFAULT_DEVICE_ID.to_string())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceId::new(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        DeviceId::new(&value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

/// Identifier of the person being marked (card UID or classifier label).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectId(String);

impl SubjectId {
    /// Create a new subject ID.
    ///
    /// The value is trimmed before validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidSubjectId` if the trimmed value is empty or
    /// longer than [`MAX_SUBJECT_ID_LENGTH`].
    pub fn new(id: &str) -> Result<Self> {
        let id = id.trim();
        let len = id.len();
        if len == 0 || len > MAX_SUBJECT_ID_LENGTH {
            return Err(Error::InvalidSubjectId(format!(
                "Subject ID must be 1-{MAX_SUBJECT_ID_LENGTH} chars, got {len}"
            )));
        }
        Ok(SubjectId(id.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SubjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SubjectId::new(s)
    }
}

/// Attendance method a submission is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttendanceMethod {
    CheckIn,
    CheckOut,
}

impl AttendanceMethod {
    /// Topic segment for this method (`check-in` / `check-out`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceMethod::CheckIn => "check-in",
            AttendanceMethod::CheckOut => "check-out",
        }
    }

    /// Marking source reported to the backend.
    #[must_use]
    pub fn marked_by(&self) -> &'static str {
        match self {
            AttendanceMethod::CheckIn => MARKED_BY_RFID,
            AttendanceMethod::CheckOut => MARKED_BY_FACE,
        }
    }

    /// Topic requests for this method are published to.
    ///
    /// ```
    /// use rollcall_core::AttendanceMethod;
    ///
    /// assert_eq!(AttendanceMethod::CheckIn.request_topic(), "attendance/check-in/request");
    /// ```
    #[must_use]
    pub fn request_topic(&self) -> String {
        format!("{ATTENDANCE_TOPIC_ROOT}/{}/request", self.as_str())
    }

    /// Topic the backend answers on for `device_id`.
    ///
    /// ```
    /// use rollcall_core::{AttendanceMethod, DeviceId};
    ///
    /// let device = DeviceId::new("4").unwrap();
    /// assert_eq!(
    ///     AttendanceMethod::CheckIn.response_topic(&device),
    ///     "attendance/check-in/response/4"
    /// );
    /// ```
    #[must_use]
    pub fn response_topic(&self, device_id: &DeviceId) -> String {
        format!(
            "{ATTENDANCE_TOPIC_ROOT}/{}/response/{}",
            self.as_str(),
            device_id
        )
    }
}

impl fmt::Display for AttendanceMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AttendanceMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "check-in" => Ok(AttendanceMethod::CheckIn),
            "check-out" => Ok(AttendanceMethod::CheckOut),
            other => Err(Error::UnknownMethod(other.to_string())),
        }
    }
}

/// Build the control topic (or filter) for a device.
///
/// Passing `"+"` yields the wildcard filter covering every device.
#[must_use]
pub fn control_topic(device_filter: &str) -> String {
    format!("{CONTROL_TOPIC_ROOT}/{device_filter}/{CONTROL_TOPIC_LEAF}")
}

/// Session state owned by the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session, both subsystems disarmed.
    #[default]
    Idle,

    /// Check-in session, card reader armed.
    CheckInArmed,

    /// Check-out session, capture pipeline armed.
    CheckOutArmed,

    /// A session was explicitly ended, both subsystems disarmed.
    Ended,
}

impl SessionState {
    /// Attendance method collected in this state, if any.
    #[must_use]
    pub fn method(&self) -> Option<AttendanceMethod> {
        match self {
            SessionState::CheckInArmed => Some(AttendanceMethod::CheckIn),
            SessionState::CheckOutArmed => Some(AttendanceMethod::CheckOut),
            SessionState::Idle | SessionState::Ended => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            SessionState::Idle => "Idle",
            SessionState::CheckInArmed => "CheckInArmed",
            SessionState::CheckOutArmed => "CheckOutArmed",
            SessionState::Ended => "Ended",
        };
        write!(f, "{}", state_str)
    }
}

/// Action decoded from a control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlAction {
    StartCheckIn,
    StartCheckOut,
    EndCheckIn,
    EndCheckOut,
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ControlMessage {
    action: Option<String>,
}

impl ControlAction {
    /// Map an action string to an action. Unrecognized strings are `Unknown`.
    ///
    /// The bare `check-in` / `check-out` strings sent by older control
    /// panels start the corresponding session.
    ///
    /// ```
    /// use rollcall_core::ControlAction;
    ///
    /// assert_eq!(ControlAction::parse("start-check-in"), ControlAction::StartCheckIn);
    /// assert_eq!(ControlAction::parse("check-out"), ControlAction::StartCheckOut);
    /// assert_eq!(ControlAction::parse("reboot"), ControlAction::Unknown);
    /// ```
    #[must_use]
    pub fn parse(action: &str) -> Self {
        match action.trim() {
            "start-check-in" | "check-in" => ControlAction::StartCheckIn,
            "start-check-out" | "check-out" => ControlAction::StartCheckOut,
            "end-check-in" => ControlAction::EndCheckIn,
            "end-check-out" => ControlAction::EndCheckOut,
            _ => ControlAction::Unknown,
        }
    }

    /// Decode a raw control payload of the form `{"action": "..."}`.
    ///
    /// # Errors
    /// Returns `Error::Decode` when the payload is not JSON or has no
    /// `action` string. Callers treat that as [`ControlAction::Unknown`].
    pub fn try_decode(payload: &[u8]) -> Result<Self> {
        let message: ControlMessage = serde_json::from_slice(payload)?;
        let action = message
            .action
            .ok_or_else(|| Error::Decode("control message has no action".to_string()))?;
        Ok(Self::parse(&action))
    }

    /// Decode a raw control payload, mapping every failure to `Unknown`.
    #[must_use]
    pub fn decode(payload: &[u8]) -> Self {
        Self::try_decode(payload).unwrap_or_else(|err| {
            tracing::debug!(error = %err, "Undecodable control payload");
            ControlAction::Unknown
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::StartCheckIn => "start-check-in",
            ControlAction::StartCheckOut => "start-check-out",
            ControlAction::EndCheckIn => "end-check-in",
            ControlAction::EndCheckOut => "end-check-out",
            ControlAction::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity resolved by the classifier for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedIdentity {
    pub identity: SubjectId,

    /// Classifier distance; lower is a closer match.
    pub confidence: f32,

    pub timestamp: DateTime<Utc>,
}

impl CapturedIdentity {
    pub fn new(identity: SubjectId, confidence: f32) -> Self {
        Self {
            identity,
            confidence,
            timestamp: Utc::now(),
        }
    }

    /// Whether this identity is close enough to be submitted.
    #[must_use]
    pub fn is_accepted(&self, threshold: f32) -> bool {
        self.confidence < threshold
    }
}

/// Request published to `attendance/{method}/request`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub method: AttendanceMethod,
    pub subject_id: SubjectId,
    pub device_id: DeviceId,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPayload<'a> {
    Card {
        rfid_tag: &'a str,
        device_id: &'a str,
        marked_by: &'static str,
    },
    Subject {
        student_id: &'a str,
        device_id: &'a str,
        marked_by: &'static str,
    },
}

impl SubmissionRequest {
    pub fn new(method: AttendanceMethod, subject_id: SubjectId, device_id: DeviceId) -> Self {
        Self {
            method,
            subject_id,
            device_id,
        }
    }

    #[must_use]
    pub fn request_topic(&self) -> String {
        self.method.request_topic()
    }

    #[must_use]
    pub fn response_topic(&self) -> String {
        self.method.response_topic(&self.device_id)
    }

    /// Serialize the wire payload.
    ///
    /// Check-ins carry the card UID as `rfid_tag`; check-outs carry the
    /// classifier label as `student_id`, the key the attendance backend
    /// reads for face-recognition marks.
    ///
    /// # Errors
    /// Returns `Error::Encode` if serialization fails.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let payload = match self.method {
            AttendanceMethod::CheckIn => RequestPayload::Card {
                rfid_tag: self.subject_id.as_str(),
                device_id: self.device_id.as_str(),
                marked_by: self.method.marked_by(),
            },
            AttendanceMethod::CheckOut => RequestPayload::Subject {
                student_id: self.subject_id.as_str(),
                device_id: self.device_id.as_str(),
                marked_by: self.method.marked_by(),
            },
        };
        serde_json::to_vec(&payload).map_err(|e| Error::Encode(e.to_string()))
    }
}

/// Why a submission did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionFailure {
    /// No correlated response arrived in time.
    Timeout,

    /// The broker could not be reached or refused the publish.
    Transport(String),

    /// A response arrived but could not be decoded.
    Decode(String),
}

impl fmt::Display for SubmissionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionFailure::Timeout => write!(f, "no response before timeout"),
            SubmissionFailure::Transport(reason) => write!(f, "transport error: {reason}"),
            SubmissionFailure::Decode(reason) => write!(f, "undecodable response: {reason}"),
        }
    }
}

/// Terminal outcome of one submission.
///
/// `failure` is `None` on success, otherwise one of
/// [`SubmissionFailure::Timeout`], [`SubmissionFailure::Transport`], or
/// [`SubmissionFailure::Decode`] for a response that was not UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub raw_response: Option<String>,
    pub succeeded: bool,
    pub failure: Option<SubmissionFailure>,
}

impl SubmissionResult {
    pub fn success(raw_response: impl Into<String>) -> Self {
        Self {
            raw_response: Some(raw_response.into()),
            succeeded: true,
            failure: None,
        }
    }

    pub fn failed(failure: SubmissionFailure) -> Self {
        Self {
            raw_response: None,
            succeeded: false,
            failure: Some(failure),
        }
    }

    pub fn timed_out() -> Self {
        Self::failed(SubmissionFailure::Timeout)
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.failure, Some(SubmissionFailure::Timeout))
    }
}
