use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Cancel,
    Pause,
    Resume,
    Kill,
    Purge,
    RestartAsNew,
}

#[derive(Clone, Debug, Serialize)]
pub struct OperationDescriptor {
    pub kind: OperationKind,
    pub endpoint: &'static str,
    pub accepts_deployment: bool,
    pub title: &'static str,
    pub description: &'static str,
    pub warning: Option<&'static str>,
}

static CANCEL: OperationDescriptor = OperationDescriptor {
    kind: OperationKind::Cancel,
    endpoint: "cancel",
    accepts_deployment: false,
    title: "Cancel invocations",
    description: "Requests cancellation of every matching invocation. Handlers observe the \
                  cancellation and may run compensation logic before completing.",
    warning: None,
};

static PAUSE: OperationDescriptor = OperationDescriptor {
    kind: OperationKind::Pause,
    endpoint: "pause",
    accepts_deployment: false,
    title: "Pause invocations",
    description: "Pauses every matching invocation. Paused invocations keep their journal \
                  and can be resumed later.",
    warning: None,
};

static RESUME: OperationDescriptor = OperationDescriptor {
    kind: OperationKind::Resume,
    endpoint: "resume",
    accepts_deployment: true,
    title: "Resume invocations",
    description: "Resumes every matching paused invocation, either on the deployment it \
                  was running on or on the latest deployment.",
    warning: Some(
        "Moving invocations to the latest deployment can break replay if the handler code changed.",
    ),
};

static KILL: OperationDescriptor = OperationDescriptor {
    kind: OperationKind::Kill,
    endpoint: "kill",
    accepts_deployment: false,
    title: "Kill invocations",
    description: "Terminates every matching invocation immediately without running \
                  compensation logic.",
    warning: Some("Killing skips compensations and can leave state inconsistent."),
};

static PURGE: OperationDescriptor = OperationDescriptor {
    kind: OperationKind::Purge,
    endpoint: "purge",
    accepts_deployment: false,
    title: "Purge invocations",
    description: "Deletes every matching completed invocation together with its journal \
                  and retained result.",
    warning: Some("Purged invocations cannot be inspected or restored."),
};

static RESTART_AS_NEW: OperationDescriptor = OperationDescriptor {
    kind: OperationKind::RestartAsNew,
    endpoint: "restart-as-new",
    accepts_deployment: false,
    title: "Restart invocations as new",
    description: "Starts a fresh invocation with the original input for every matching \
                  completed invocation.",
    warning: Some("Restarting re-executes side effects of the original handler."),
};

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Cancel,
        OperationKind::Pause,
        OperationKind::Resume,
        OperationKind::Kill,
        OperationKind::Purge,
        OperationKind::RestartAsNew,
    ];

    pub fn descriptor(self) -> &'static OperationDescriptor {
        match self {
            OperationKind::Cancel => &CANCEL,
            OperationKind::Pause => &PAUSE,
            OperationKind::Resume => &RESUME,
            OperationKind::Kill => &KILL,
            OperationKind::Purge => &PURGE,
            OperationKind::RestartAsNew => &RESTART_AS_NEW,
        }
    }

    pub fn endpoint(self) -> &'static str {
        self.descriptor().endpoint
    }

    pub fn accepts_deployment(self) -> bool {
        self.descriptor().accepts_deployment
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOperation(pub String);

impl fmt::Display for UnknownOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown batch operation: {}", self.0)
    }
}

impl std::error::Error for UnknownOperation {}

impl FromStr for OperationKind {
    type Err = UnknownOperation;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        OperationKind::ALL
            .into_iter()
            .find(|kind| kind.endpoint() == normalized)
            .ok_or_else(|| UnknownOperation(value.to_string()))
    }
}

pub fn catalog() -> Vec<&'static OperationDescriptor> {
    OperationKind::ALL
        .into_iter()
        .map(OperationKind::descriptor)
        .collect()
}
