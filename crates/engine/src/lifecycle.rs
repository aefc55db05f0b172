//! Engine lifecycle state machine.
//!
//! `installing → installed → activating → active`, one way only, once per
//! engine version. Transitions are serialized by a single lock and every
//! state change is published on a watch channel.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{Mutex, watch};
use waypost_core::{AppConfig, Error};

use crate::manager::{GenerationManager, InstallReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Installing,
    Installed,
    Activating,
    Active,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages accepted from the surrounding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Take over now instead of waiting for old sessions to close.
    ForceActivate,
    /// Ask for the running engine version.
    GetVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlReply {
    /// State after handling `force-activate`.
    Activated { state: LifecycleState },
    Version { version: String },
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LifecycleStatus {
    pub state: LifecycleState,
    pub version: String,
    pub skip_waiting: bool,
    pub sessions_claimed: bool,
}

#[derive(Debug, Default)]
struct Flags {
    skip_waiting: bool,
    sessions_claimed: bool,
}

pub struct LifecycleController {
    manager: GenerationManager,
    version: String,
    skip_waiting_on_install: bool,
    state: watch::Sender<LifecycleState>,
    flags: Mutex<Flags>,
}

impl LifecycleController {
    pub fn new(manager: GenerationManager, version: impl Into<String>, skip_waiting_on_install: bool) -> Self {
        let (state, _) = watch::channel(LifecycleState::Installing);
        Self { manager, version: version.into(), skip_waiting_on_install, state, flags: Mutex::new(Flags::default()) }
    }

    pub fn from_config(config: &AppConfig, manager: GenerationManager) -> Self {
        Self::new(manager, config.engine_version.clone(), config.skip_waiting)
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// The Process Generation Token.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub async fn status(&self) -> LifecycleStatus {
        let flags = self.flags.lock().await;
        LifecycleStatus {
            state: self.state(),
            version: self.version.clone(),
            skip_waiting: flags.skip_waiting,
            sessions_claimed: flags.sessions_claimed,
        }
    }

    /// Install, then activate right away if skip-waiting was signalled.
    ///
    /// A version whose static generation is already in the store was
    /// installed by an earlier process; it is resumed without touching the
    /// network and activated, since no older session can still be open.
    /// Calling it again after a failed install retries the install; after
    /// a successful one it only finishes whatever is left.
    ///
    /// # Errors
    ///
    /// Install or activation failures, with the controller left where the
    /// failure happened.
    pub async fn boot(&self) -> Result<LifecycleState, Error> {
        if self.state() == LifecycleState::Installing {
            match self.manager.is_installed().await {
                Ok(true) => self.resume().await,
                Ok(false) => {
                    self.install().await?;
                }
                Err(e) => {
                    tracing::warn!(version = %self.version, error = %e, "could not check for an earlier install");
                    self.install().await?;
                }
            }
        }

        let skip_waiting = self.flags.lock().await.skip_waiting;
        if skip_waiting {
            self.activate().await?;
        } else if self.state() == LifecycleState::Installed {
            tracing::info!(version = %self.version, "installed, waiting for force-activate");
        }

        Ok(self.state())
    }

    /// Populate the static generation and move to `installed`.
    pub async fn install(&self) -> Result<InstallReport, Error> {
        let mut flags = self.flags.lock().await;

        if self.state() != LifecycleState::Installing {
            return Err(Error::InvalidState(format!("cannot install while {}", self.state())));
        }

        match self.manager.install().await {
            Ok(report) => {
                if self.skip_waiting_on_install {
                    flags.skip_waiting = true;
                }
                self.transition(LifecycleState::Installed);
                Ok(report)
            }
            Err(e) => {
                tracing::error!(version = %self.version, error = %e, "install failed, will retry on next boot");
                Err(e)
            }
        }
    }

    /// Move a version installed by an earlier process to `installed` with
    /// skip-waiting set.
    async fn resume(&self) {
        let mut flags = self.flags.lock().await;
        if self.state() != LifecycleState::Installing {
            return;
        }

        flags.skip_waiting = true;
        tracing::info!(version = %self.version, "static generation already installed, skipping install");
        self.transition(LifecycleState::Installed);
    }

    /// Delete stale generations, claim open sessions and move to `active`.
    ///
    /// A no-op once active.
    pub async fn activate(&self) -> Result<Vec<String>, Error> {
        let mut flags = self.flags.lock().await;

        match self.state() {
            LifecycleState::Active => return Ok(Vec::new()),
            LifecycleState::Installing => {
                return Err(Error::InvalidState("cannot activate before install completes".into()));
            }
            LifecycleState::Installed | LifecycleState::Activating => {}
        }

        self.transition(LifecycleState::Activating);
        let deleted = self.manager.activate().await?;

        flags.sessions_claimed = true;
        self.transition(LifecycleState::Active);
        tracing::info!(version = %self.version, deleted = deleted.len(), "claimed open sessions");

        Ok(deleted)
    }

    /// Handle a control message.
    ///
    /// `force-activate` while still installing only records the request;
    /// activation then follows the install.
    pub async fn handle_control(&self, message: ControlMessage) -> Result<ControlReply, Error> {
        match message {
            ControlMessage::GetVersion => Ok(ControlReply::Version { version: self.version.clone() }),
            ControlMessage::ForceActivate => {
                match self.state() {
                    LifecycleState::Installing => {
                        self.flags.lock().await.skip_waiting = true;
                    }
                    LifecycleState::Installed | LifecycleState::Activating => {
                        self.flags.lock().await.skip_waiting = true;
                        self.activate().await?;
                    }
                    LifecycleState::Active => {}
                }
                Ok(ControlReply::Activated { state: self.state() })
            }
        }
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(version = %self.version, from = %previous, to = %next, "lifecycle transition");
        }
    }
}
