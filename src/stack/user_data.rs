//! First-boot script for the proxy host.

/// Source of the reality-ezpz installer.
pub const INSTALLER_URL: &str =
    "https://raw.githubusercontent.com/aleskxyz/reality-ezpz/master/reality-ezpz.sh";

/// Marker file written once the installer has finished.
pub const SETUP_COMPLETE_MARKER: &str = "/tmp/reality-setup-complete";

const SHEBANG: &str = "#!/bin/bash";

/// Shell lines executed once by the instance on first boot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootScript {
    lines: Vec<String>,
}

impl BootScript {
    /// Script that elevates, runs the installer, and writes the completion
    /// marker.
    #[must_use]
    pub fn proxy_installer() -> Self {
        Self {
            lines: vec![
                String::from("sudo -i"),
                installer_invocation(),
                format!("touch {SETUP_COMPLETE_MARKER}"),
            ],
        }
    }

    /// Lines in execution order.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Renders the script as instance user data.
    #[must_use]
    pub fn render(&self) -> String {
        let mut rendered = String::from(SHEBANG);
        for line in &self.lines {
            rendered.push('\n');
            rendered.push_str(line);
        }
        rendered
    }
}

/// Shell fragment that downloads and runs the installer.
#[must_use]
pub fn installer_invocation() -> String {
    format!("bash <(curl -sL {INSTALLER_URL})")
}
