use std::fmt;

/// Outcome code of one extension-point stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Code {
    /// The plugin ran and the pod may proceed.
    #[default]
    Success,
    /// Internal plugin failure; aborts the scheduling attempt.
    Error,
    /// The pod cannot be placed here this cycle, but a retry may succeed.
    Unschedulable,
    /// Like Unschedulable, but a retry is futile until the cluster changes.
    UnschedulableAndUnresolvable,
    /// Only legal from Permit: hold the pod until allowed, rejected or
    /// timed out.
    Wait,
    /// Only meaningful in Bind: this plugin passes on the pod.
    Skip,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Code::Success => "Success",
            Code::Error => "Error",
            Code::Unschedulable => "Unschedulable",
            Code::UnschedulableAndUnresolvable => "UnschedulableAndUnresolvable",
            Code::Wait => "Wait",
            Code::Skip => "Skip",
        };
        f.write_str(s)
    }
}

/// Uniform result of running a plugin at an extension point.
///
/// A status is an immutable value: a [`Code`] plus an ordered list of
/// reasons. Stages wrap plugin failures into `Error` statuses with a
/// message of the form `running <Stage> plugin "<name>": <cause>`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Status {
    code: Code,
    reasons: Vec<String>,
}

impl Status {
    /// A status with the given code and a single reason. An empty reason
    /// is omitted.
    pub fn new(code: Code, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reasons = if reason.is_empty() {
            Vec::new()
        } else {
            vec![reason]
        };
        Self { code, reasons }
    }

    /// A successful status with no message.
    pub fn success() -> Self {
        Self::default()
    }

    /// Wrap an error value as an `Error` status.
    pub fn from_error(err: impl fmt::Display) -> Self {
        Self::new(Code::Error, err.to_string())
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    /// All reasons joined into one message.
    pub fn message(&self) -> String {
        self.reasons.join(", ")
    }

    pub fn append_reason(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }

    pub fn is_success(&self) -> bool {
        self.code == Code::Success
    }

    /// True for both unschedulable flavors.
    pub fn is_unschedulable(&self) -> bool {
        matches!(
            self.code,
            Code::Unschedulable | Code::UnschedulableAndUnresolvable
        )
    }

    pub fn is_wait(&self) -> bool {
        self.code == Code::Wait
    }

    pub fn is_skip(&self) -> bool {
        self.code == Code::Skip
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reasons.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message())
        }
    }
}

/// Merge precedence: higher wins when combining per-plugin statuses.
fn precedence(code: Code) -> u8 {
    match code {
        Code::Error => 3,
        Code::UnschedulableAndUnresolvable => 2,
        Code::Unschedulable => 1,
        _ => 0,
    }
}

/// Per-plugin statuses collected by one Filter run, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginToStatus {
    entries: Vec<(String, Status)>,
}

impl PluginToStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, plugin: impl Into<String>, status: Status) {
        self.entries.push((plugin.into(), status));
    }

    pub fn get(&self, plugin: &str) -> Option<&Status> {
        self.entries
            .iter()
            .find(|(name, _)| name == plugin)
            .map(|(_, status)| status)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Status)> {
        self.entries.iter().map(|(n, s)| (n.as_str(), s))
    }

    /// Collapse the per-plugin statuses into one.
    ///
    /// Any `Error` wins and keeps the message of its first occurrence.
    /// Otherwise `UnschedulableAndUnresolvable` beats `Unschedulable`, and
    /// the reasons of every non-success status concatenate in registration
    /// order.
    pub fn merge(&self) -> Status {
        if self.entries.is_empty() {
            return Status::success();
        }

        if let Some((_, first_err)) = self
            .entries
            .iter()
            .find(|(_, s)| s.code() == Code::Error)
        {
            return first_err.clone();
        }

        let mut merged = Status::success();
        for (_, status) in &self.entries {
            if precedence(status.code()) > precedence(merged.code()) {
                merged.code = status.code();
            }
            if !status.is_success() {
                for reason in status.reasons() {
                    merged.append_reason(reason.clone());
                }
            }
        }
        merged
    }
}
