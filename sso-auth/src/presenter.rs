//! Verification URL presenters
//!
//! During device authorization the user has to visit a URL and confirm a
//! code. How that URL reaches them is a policy decision made by the caller.

use crate::error::{AuthError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sso_common::DeviceAuthorization;
use std::process::Stdio;
use std::sync::Arc;
use tracing::{debug, info};

/// Hands the verification URL to the user
#[async_trait]
pub trait VerificationPresenter: Send + Sync {
    /// Show or open the verification URL for `device`
    async fn present(&self, device: &DeviceAuthorization) -> Result<()>;
}

/// How to present the verification URL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlAction {
    /// Print it to stderr
    #[default]
    Print,
    /// Open the default browser
    Open,
    /// Run a configured command
    Exec,
}

impl std::str::FromStr for UrlAction {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "print" => Ok(UrlAction::Print),
            "open" => Ok(UrlAction::Open),
            "exec" => Ok(UrlAction::Exec),
            other => Err(AuthError::Presenter(format!("unknown url action: {}", other))),
        }
    }
}

/// Select the presenter for `action`. `Exec` needs a non-empty command.
pub fn presenter_for(
    action: UrlAction,
    exec_command: &[String],
) -> Result<Arc<dyn VerificationPresenter>> {
    Ok(match action {
        UrlAction::Print => Arc::new(PrintPresenter),
        UrlAction::Open => Arc::new(BrowserPresenter),
        UrlAction::Exec => Arc::new(CommandPresenter::new(exec_command.to_vec())?),
    })
}

fn announce_code(device: &DeviceAuthorization) {
    eprintln!("Verify this code in your browser: {}", device.user_code);
}

/// Prints the URL and code to stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintPresenter;

#[async_trait]
impl VerificationPresenter for PrintPresenter {
    async fn present(&self, device: &DeviceAuthorization) -> Result<()> {
        eprintln!(
            "Please open the following URL in your browser:\n\n    {}\n",
            device.presentation_url()
        );
        announce_code(device);
        Ok(())
    }
}

/// Opens the URL with the platform default browser
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserPresenter;

#[async_trait]
impl VerificationPresenter for BrowserPresenter {
    async fn present(&self, device: &DeviceAuthorization) -> Result<()> {
        announce_code(device);
        info!("Opening verification URL in browser");
        open::that(device.presentation_url()).map_err(|e| AuthError::Presenter(e.to_string()))
    }
}

/// Runs a command, substituting `%s` with the URL or appending it
#[derive(Debug, Clone)]
pub struct CommandPresenter {
    program: String,
    args: Vec<String>,
}

impl CommandPresenter {
    /// `command[0]` is the program, the rest are its arguments
    pub fn new(command: Vec<String>) -> Result<Self> {
        let mut parts = command.into_iter();
        let program = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AuthError::Presenter("url exec command is empty".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Arguments with the URL substituted
    pub fn args_for(&self, url: &str) -> Vec<String> {
        let mut substituted = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                if arg.contains("%s") {
                    substituted = true;
                    arg.replace("%s", url)
                } else {
                    arg.clone()
                }
            })
            .collect();
        if !substituted {
            args.push(url.to_string());
        }
        args
    }
}

#[async_trait]
impl VerificationPresenter for CommandPresenter {
    async fn present(&self, device: &DeviceAuthorization) -> Result<()> {
        announce_code(device);
        let args = self.args_for(device.presentation_url());
        debug!(program = %self.program, ?args, "launching url command");

        tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AuthError::Presenter(format!("{}: {}", self.program, e)))?;
        Ok(())
    }
}
