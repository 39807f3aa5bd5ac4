//! Host requirement checks gating the install workflows.
//!
//! Each probe reports [`CheckOutcome::Unknown`] when it cannot decide, and
//! [`RequirementReport::requirements_met`] decides per platform which unknowns
//! are tolerable.

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use crate::models::{LauncherConfig, Platform};
use crate::services::process::{Invocation, ToolRunner};

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

static VERSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(?:\.(\d+))?(?:\.(\d+))?").expect("valid version regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Met,
    Unmet,
    Unknown,
}

impl From<bool> for CheckOutcome {
    fn from(met: bool) -> Self {
        if met { CheckOutcome::Met } else { CheckOutcome::Unmet }
    }
}

/// Results of every probe on one platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementReport {
    pub platform: Platform,
    pub avx: CheckOutcome,
    pub opengl: CheckOutcome,
    pub disk_space: CheckOutcome,
    pub runtime: CheckOutcome,
    pub macos_version: CheckOutcome,
}

impl RequirementReport {
    /// Whether installs may proceed.
    ///
    /// Unknown AVX passes on macOS, unknown runtime passes off Windows and an
    /// unknown macOS version passes off macOS. Every other unknown blocks.
    pub fn requirements_met(&self) -> bool {
        self.blocking().is_empty()
    }

    /// Names of the checks that block an install
    pub fn blocking(&self) -> Vec<String> {
        let platform = self.platform;
        let checks = [
            ("avx", self.avx, platform == Platform::Macos),
            ("opengl", self.opengl, false),
            ("disk_space", self.disk_space, false),
            ("runtime", self.runtime, platform != Platform::Windows),
            ("macos_version", self.macos_version, platform != Platform::Macos),
        ];
        checks
            .into_iter()
            .filter(|(_, outcome, unknown_ok)| match outcome {
                CheckOutcome::Met => false,
                CheckOutcome::Unmet => true,
                CheckOutcome::Unknown => !unknown_ok,
            })
            .map(|(name, _, _)| name.to_string())
            .collect()
    }
}

/// Runs the host probes, remembering the OpenGL result
pub struct RequirementChecker {
    runner: Arc<dyn ToolRunner>,
    platform: Platform,
    glewinfo: Utf8PathBuf,
    min_opengl_version: String,
    min_disk_space_bytes: u64,
    min_macos_version: String,
    opengl_cache: Mutex<Option<CheckOutcome>>,
}

impl RequirementChecker {
    pub fn new(runner: Arc<dyn ToolRunner>, config: &LauncherConfig) -> Self {
        Self {
            runner,
            platform: Platform::current(),
            glewinfo: config.glewinfo_path.clone(),
            min_opengl_version: config.min_opengl_version.clone(),
            min_disk_space_bytes: config.min_disk_space_bytes(),
            min_macos_version: config.min_macos_version.clone(),
            opengl_cache: Mutex::new(None),
        }
    }

    /// Pretend to run on another platform
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn check_avx(&self) -> CheckOutcome {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            CheckOutcome::from(std::arch::is_x86_feature_detected!("avx"))
        }
        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
        {
            CheckOutcome::Unknown
        }
    }

    /// Ask glewinfo whether the minimum OpenGL version is available.
    ///
    /// A definite answer is cached until `force` is passed.
    pub async fn check_opengl(&self, force: bool) -> CheckOutcome {
        if !force {
            if let Some(cached) = *self.opengl_cache.lock().unwrap() {
                return cached;
            }
        }

        let invocation = Invocation::new(&self.glewinfo)
            .args(["-version", self.min_opengl_version.as_str()])
            .timeout(PROBE_TIMEOUT);
        let outcome = match self.runner.run(invocation, None).await {
            Ok(result) => CheckOutcome::from(result.success()),
            Err(e) => {
                tracing::warn!("OpenGL probe failed: {}", e);
                CheckOutcome::Unknown
            }
        };

        if outcome != CheckOutcome::Unknown {
            *self.opengl_cache.lock().unwrap() = Some(outcome);
        }
        outcome
    }

    /// Free space on the volume holding `dir` (or its closest existing ancestor)
    pub async fn check_disk_space(&self, dir: &Utf8Path) -> CheckOutcome {
        let Some(existing) = dir.ancestors().find(|p| p.exists()) else {
            return CheckOutcome::Unknown;
        };

        let available = match self.platform {
            Platform::Windows => {
                let Some(drive) = drive_letter(existing) else {
                    return CheckOutcome::Unknown;
                };
                let script = format!("(Get-PSDrive -Name '{}').Free", drive);
                let invocation = Invocation::new("powershell")
                    .args(["-NoProfile", "-Command", script.as_str()])
                    .timeout(PROBE_TIMEOUT);
                self.probe_output(invocation)
                    .await
                    .and_then(|out| out.trim().parse::<u64>().ok())
            }
            Platform::Linux | Platform::Macos => {
                let invocation = Invocation::new("df")
                    .args(["-Pk", existing.as_str()])
                    .timeout(PROBE_TIMEOUT);
                self.probe_output(invocation)
                    .await
                    .and_then(|out| parse_df_available_kb(&out))
                    .map(|kb| kb.saturating_mul(1024))
            }
        };

        match available {
            Some(bytes) => {
                tracing::debug!("{} bytes free at {}", bytes, existing);
                CheckOutcome::from(bytes >= self.min_disk_space_bytes)
            }
            None => CheckOutcome::Unknown,
        }
    }

    /// The Visual C++ runtime on Windows; undecidable elsewhere
    pub async fn check_runtime(&self) -> CheckOutcome {
        if self.platform != Platform::Windows {
            return CheckOutcome::Unknown;
        }
        let invocation = Invocation::new("reg")
            .args([
                "query",
                r"HKLM\SOFTWARE\Microsoft\VisualStudio\14.0\VC\Runtimes\x64",
                "/v",
                "Installed",
            ])
            .timeout(PROBE_TIMEOUT);
        match self.runner.run(invocation, None).await {
            Ok(result) if result.success() => CheckOutcome::from(result.stdout.contains("0x1")),
            // Missing key means not installed
            Ok(_) => CheckOutcome::Unmet,
            Err(e) => {
                tracing::warn!("Runtime probe failed: {}", e);
                CheckOutcome::Unknown
            }
        }
    }

    pub async fn check_macos_version(&self) -> CheckOutcome {
        if self.platform != Platform::Macos {
            return CheckOutcome::Unknown;
        }
        let invocation = Invocation::new("sw_vers")
            .arg("-productVersion")
            .timeout(PROBE_TIMEOUT);
        let installed = self
            .probe_output(invocation)
            .await
            .and_then(|out| parse_version(&out));
        match (installed, parse_version(&self.min_macos_version)) {
            (Some(installed), Some(minimum)) => CheckOutcome::from(installed >= minimum),
            _ => CheckOutcome::Unknown,
        }
    }

    /// Run every probe
    pub async fn check_all(&self, install_dir: Option<&Utf8Path>, force: bool) -> RequirementReport {
        let disk_space = match install_dir {
            Some(dir) => self.check_disk_space(dir).await,
            None => CheckOutcome::Unknown,
        };
        let report = RequirementReport {
            platform: self.platform,
            avx: self.check_avx(),
            opengl: self.check_opengl(force).await,
            disk_space,
            runtime: self.check_runtime().await,
            macos_version: self.check_macos_version().await,
        };
        tracing::info!("Requirement check: {:?}", report);
        report
    }

    async fn probe_output(&self, invocation: Invocation) -> Option<String> {
        let program = invocation.program.clone();
        match self.runner.run(invocation, None).await {
            Ok(result) if result.success() => Some(result.stdout),
            Ok(result) => {
                tracing::warn!("{} exited with {:?}", program, result.exit_code);
                None
            }
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }
}

/// Available kilobytes from POSIX `df -Pk` output
pub fn parse_df_available_kb(output: &str) -> Option<u64> {
    output
        .lines()
        .nth(1)?
        .split_whitespace()
        .nth(3)?
        .parse()
        .ok()
}

/// `major.minor.patch` with missing parts as zero
pub fn parse_version(text: &str) -> Option<(u32, u32, u32)> {
    let caps = VERSION_REGEX.captures(text)?;
    let part = |i: usize| {
        caps.get(i)
            .map_or(Some(0), |m| m.as_str().parse::<u32>().ok())
    };
    Some((part(1)?, part(2)?, part(3)?))
}

fn drive_letter(path: &Utf8Path) -> Option<char> {
    let mut chars = path.as_str().chars();
    let letter = chars.next()?;
    (letter.is_ascii_alphabetic() && chars.next() == Some(':')).then_some(letter)
}
