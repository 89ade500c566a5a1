use crate::backend::{
    CommandOutput, CredentialRequest, EndpointRegistration, HaResources, RuntimeBackend,
};
use crate::prereq::command_exists;
use crate::RuntimeError;
use serde::Serialize;
use stagehand_schema::DaemonName;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub const DEFAULT_RENDER_HELPER: &str = "stagehand-render";
pub const DEFAULT_RELATION_HELPER: &str = "stagehand-relation";
const CONFIG_MODE: u32 = 0o644;

/// Backend that acts on the local machine.
///
/// Packages go through `apt-get`, daemons through `systemctl`. Templating
/// and relation traffic are delegated to helper programs which receive a JSON
/// document on stdin: the render helper prints the rendered file for the path
/// given as its argument, the relation helper takes the verb as argument.
pub struct HostBackend {
    render_helper: String,
    relation_helper: String,
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBackend {
    pub fn new() -> Self {
        Self::with_helpers(DEFAULT_RENDER_HELPER, DEFAULT_RELATION_HELPER)
    }

    pub fn with_helpers(render_helper: &str, relation_helper: &str) -> Self {
        Self {
            render_helper: render_helper.to_owned(),
            relation_helper: relation_helper.to_owned(),
        }
    }

    pub fn render_helper(&self) -> &str {
        &self.render_helper
    }

    pub fn relation_helper(&self) -> &str {
        &self.relation_helper
    }

    fn run_with_input(
        &self,
        argv: &[String],
        input: Option<&[u8]>,
    ) -> Result<CommandOutput, RuntimeError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| RuntimeError::ExecFailed("empty command".to_owned()))?;
        debug!("exec: {}", argv.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if input.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| RuntimeError::ExecFailed(format!("failed to spawn {program}: {e}")))?;
        let stdin = child.stdin.take();

        // stdin is fed while stdout and stderr drain; the child is reaped
        // even when feeding fails.
        let (output, fed) = thread::scope(|scope| {
            let writer = input.zip(stdin).map(|(data, mut stdin)| {
                scope.spawn(move || match stdin.write_all(data) {
                    // Helpers that ignore their input may exit before reading it.
                    Err(e) if e.kind() != ErrorKind::BrokenPipe => Err(e),
                    _ => Ok(()),
                })
            });
            let output = child.wait_with_output();
            let fed = writer.map_or(Ok(()), |handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(io::Error::other("stdin writer panicked")))
            });
            (output, fed)
        });
        let output = output?;
        fed?;
        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn checked(&self, argv: &[String], input: Option<&[u8]>) -> Result<CommandOutput, RuntimeError> {
        let output = self.run_with_input(argv, input)?;
        if output.success() {
            Ok(output)
        } else {
            Err(RuntimeError::CommandFailed {
                argv: argv.join(" "),
                status: output.status,
                stderr: output.stderr.trim().to_owned(),
            })
        }
    }

    fn relation(&self, verb: &str, payload: &impl Serialize) -> Result<(), RuntimeError> {
        let body = serde_json::to_vec(payload)?;
        let argv = [self.relation_helper.clone(), verb.to_owned()];
        self.checked(&argv, Some(&body))?;
        Ok(())
    }
}

/// Atomically replace `path` with `contents` and apply `mode`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<(), RuntimeError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(mode))?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| RuntimeError::Io(e.error))?;
    Ok(())
}

impl RuntimeBackend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    fn available(&self) -> bool {
        command_exists("apt-get") && command_exists("systemctl")
    }

    fn install(&self, packages: &[String]) -> Result<(), RuntimeError> {
        if packages.is_empty() {
            return Ok(());
        }
        let mut argv = vec![
            "apt-get".to_owned(),
            "install".to_owned(),
            "-y".to_owned(),
            "--no-install-recommends".to_owned(),
        ];
        argv.extend(packages.iter().cloned());
        self.checked(&argv, None)?;
        info!("installed {} packages", packages.len());
        Ok(())
    }

    fn render(
        &self,
        files: &[String],
        context: &serde_json::Value,
    ) -> Result<Vec<String>, RuntimeError> {
        let input = serde_json::to_vec(context)?;
        let mut changed = Vec::new();
        for file in files {
            let argv = [self.render_helper.clone(), file.clone()];
            let output = self.checked(&argv, Some(&input))?;
            let path = Path::new(file);
            let current = fs::read(path).ok();
            if current.as_deref() == Some(output.stdout.as_bytes()) {
                continue;
            }
            write_atomic(path, output.stdout.as_bytes(), CONFIG_MODE)?;
            debug!("rendered {file}");
            changed.push(file.clone());
        }
        Ok(changed)
    }

    fn restart(&self, daemons: &[DaemonName]) -> Result<(), RuntimeError> {
        for daemon in daemons {
            let argv = [
                "systemctl".to_owned(),
                "restart".to_owned(),
                daemon.to_string(),
            ];
            self.checked(&argv, None)?;
            info!("restarted {daemon}");
        }
        Ok(())
    }

    fn run(&self, argv: &[String]) -> Result<CommandOutput, RuntimeError> {
        self.run_with_input(argv, None)
    }

    fn request_credentials(&self, request: &CredentialRequest) -> Result<(), RuntimeError> {
        self.relation("request-credentials", request)
    }

    fn register_endpoint(&self, registration: &EndpointRegistration) -> Result<(), RuntimeError> {
        self.relation("register-endpoint", registration)
    }

    fn announce_peer(&self, address: &str) -> Result<(), RuntimeError> {
        self.relation("announce-peer", &serde_json::json!({ "address": address }))
    }

    fn configure_ha(&self, resources: &HaResources) -> Result<(), RuntimeError> {
        self.relation("configure-ha", resources)
    }

    fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<(), RuntimeError> {
        write_atomic(Path::new(path), contents, mode)
    }
}
