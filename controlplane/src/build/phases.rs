//! Build backend phase to deployment step lookup

/// Step opened when a build has no phase yet
pub const INITIALIZING: &str = "INITIALIZING";
pub const AUTHENTICATING: &str = "AUTHENTICATING";
pub const STARTING_BUILD: &str = "STARTING_BUILD";
pub const DEPLOYING: &str = "DEPLOYING";

/// One row of the phase table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseStep {
    pub step: &'static str,
    pub message: &'static str,
    pub completed: &'static str,
}

const PHASES: &[(&str, PhaseStep)] = &[
    ("SUBMITTED", PhaseStep { step: "QUEUED", message: "Build submitted to queue", completed: "Build submitted" }),
    ("QUEUED", PhaseStep { step: "QUEUED", message: "Waiting for build environment", completed: "Build environment ready" }),
    ("PROVISIONING", PhaseStep { step: "PROVISIONING", message: "Provisioning build environment", completed: "Build environment provisioned" }),
    ("DOWNLOAD_SOURCE", PhaseStep { step: "CLONING", message: "Cloning repository", completed: "Repository cloned" }),
    ("INSTALL", PhaseStep { step: "INSTALLING", message: "Installing dependencies", completed: "Dependencies installed" }),
    ("PRE_BUILD", PhaseStep { step: "PRE_BUILD", message: "Running pre-build commands", completed: "Pre-build commands completed" }),
    ("BUILD", PhaseStep { step: "BUILDING", message: "Building image", completed: "Image built" }),
    ("POST_BUILD", PhaseStep { step: "POST_BUILD", message: "Running post-build commands", completed: "Post-build commands completed" }),
    ("UPLOAD_ARTIFACTS", PhaseStep { step: "PUSHING_IMAGE", message: "Pushing image to registry", completed: "Image pushed to registry" }),
    ("FINALIZING", PhaseStep { step: "FINALIZING", message: "Finalizing build", completed: "Build finalized" }),
];

/// Look a backend phase up, case-insensitively
pub fn lookup(phase: &str) -> Option<PhaseStep> {
    let phase = phase.to_ascii_uppercase();
    PHASES
        .iter()
        .find(|(name, _)| *name == phase)
        .map(|(_, step)| *step)
}

/// Step name and message for a phase; unknown phases pass through by name
pub fn step_for(phase: &str) -> (String, String) {
    match lookup(phase) {
        Some(step) => (step.step.to_string(), step.message.to_string()),
        None => (phase.to_ascii_uppercase(), format!("Processing: {}", phase)),
    }
}

/// Message recorded when the step for `phase` is closed
pub fn completed_message(phase: &str) -> String {
    match lookup(phase) {
        Some(step) => step.completed.to_string(),
        None => format!("Step completed: {}", phase),
    }
}
