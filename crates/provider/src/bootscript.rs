// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boot script generator.
//!
//! `generate` is a pure function from [`BootParams`] to a bash program; the
//! same params always yield byte-identical output. The emitted script is
//! the only code that runs on the remote resource, and it upholds four
//! guarantees the orchestrator depends on:
//!
//! 1. Each secret handle is read exactly once at startup; a missing
//!    required credential reports a `failed` heartbeat and exits non-zero
//!    before the task body runs.
//! 2. A `running` heartbeat is posted before the task body.
//! 3. Exactly one terminal heartbeat (`completed` or `failed`) is posted,
//!    sentinel-guarded, on every exit path including timeout.
//! 4. The task text travels base64-encoded — operator prompts are data,
//!    never shell.

use crate::broker::{Injection, SecretHandle};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use fleet_core::{AgentId, Backend, Engine as TaskEngine, TaskSpec};
use std::fmt::Write;

/// Metadata endpoint visible only from inside a GCE instance.
const METADATA_ATTRIBUTES_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/attributes";

/// Inputs to boot script generation.
#[derive(Debug, Clone)]
pub struct BootParams<'a> {
    pub agent_id: &'a AgentId,
    pub task: &'a TaskSpec,
    pub backend: Backend,
    /// Daemon heartbeat endpoint; empty disables reporting (the script
    /// still runs the task).
    pub control_plane_url: &'a str,
    pub secrets: &'a [SecretHandle],
    /// Name of the handle whose value authenticates heartbeats.
    pub auth_secret: &'a str,
}

/// Render the boot program for one agent.
pub fn generate(params: &BootParams<'_>) -> String {
    let mut s = String::with_capacity(8 * 1024);
    header(&mut s, params);
    secret_loading(&mut s, params);
    heartbeat_helpers(&mut s, params);
    credential_check(&mut s, params);
    workspace_setup(&mut s, params);
    harness_install(&mut s, params);
    task_body(&mut s, params);
    teardown(&mut s, params);
    s
}

fn header(s: &mut String, p: &BootParams<'_>) {
    s.push_str("#!/bin/bash\nset -uo pipefail\n\n");
    let _ = writeln!(s, "AGENT_ID={}", sh_quote(p.agent_id.as_str()));
    let _ = writeln!(s, "CONTROL_PLANE_URL={}", sh_quote(p.control_plane_url));
    let _ = writeln!(s, "TIMEOUT_SECS={}", p.task.timeout_secs);
    let _ = writeln!(s, "MAX_ITERATIONS={}", p.task.max_iterations);
    let _ = writeln!(s, "KEEP_ALIVE={}", if p.task.keep_alive { 1 } else { 0 });
    let _ = writeln!(s, "REPO={}", sh_quote(p.task.repo.as_deref().unwrap_or("")));
    let _ = writeln!(s, "BRANCH={}", sh_quote(p.task.branch.as_deref().unwrap_or("")));
    s.push_str(
        "\nlog() { echo \"[$(date '+%Y-%m-%d %H:%M:%S')] $1\" | tee -a /var/log/fleet-agent.log; }\n\
         export HOME=/root\n\
         export DEBIAN_FRONTEND=noninteractive\n\n",
    );
}

/// Emit one read per handle. Metadata handles curl the local-only endpoint;
/// env handles are already present in the container environment.
fn secret_loading(s: &mut String, p: &BootParams<'_>) {
    s.push_str("# Load credentials (one read per handle)\n");
    for handle in p.secrets {
        let var = shell_var(&handle.name);
        match &handle.injection {
            Injection::MetadataItem { key } => {
                let _ = writeln!(
                    s,
                    "{var}=$(curl -sf -H 'Metadata-Flavor: Google' {url}/{key} || echo '')",
                    url = METADATA_ATTRIBUTES_URL,
                );
            }
            Injection::EnvVar { name } => {
                let _ = writeln!(s, "{var}=\"${{{name}:-}}\"");
            }
        }
        let _ = writeln!(s, "export {var}");
    }
    s.push('\n');
}

fn heartbeat_helpers(s: &mut String, p: &BootParams<'_>) {
    let token_var = shell_var(p.auth_secret);
    let _ = write!(
        s,
        "report() {{\n\
         \x20   local status=$1\n\
         \x20   local message=${{2:-}}\n\
         \x20   [ -n \"$CONTROL_PLANE_URL\" ] || return 0\n\
         \x20   curl -s -X POST \"$CONTROL_PLANE_URL/heartbeat\" \\\n\
         \x20       -H 'Content-Type: application/json' \\\n\
         \x20       -H \"Authorization: Bearer ${token_var}\" \\\n\
         \x20       -d \"{{\\\"agent_id\\\": \\\"$AGENT_ID\\\", \\\"status\\\": \\\"$status\\\", \\\"message\\\": \\\"$message\\\"}}\" \\\n\
         \x20       --connect-timeout 5 --max-time 10 \\\n\
         \x20       >/dev/null 2>&1 || log \"heartbeat ($status) undeliverable\"\n\
         }}\n\n\
         # Terminal heartbeat fires at most once, whichever path exits first.\n\
         TERMINAL_REPORTED=0\n\
         finish() {{\n\
         \x20   if [ \"$TERMINAL_REPORTED\" -eq 0 ]; then\n\
         \x20       TERMINAL_REPORTED=1\n\
         \x20       report \"$1\" \"$2\"\n\
         \x20   fi\n\
         }}\n\n",
    );
}

fn credential_check(s: &mut String, p: &BootParams<'_>) {
    for handle in p.secrets.iter().filter(|h| h.required) {
        let var = shell_var(&handle.name);
        let _ = write!(
            s,
            "if [ -z \"${var}\" ]; then\n\
             \x20   log 'missing required credential: {name}'\n\
             \x20   finish failed 'missing required credential: {name}'\n\
             \x20   exit 1\n\
             fi\n",
            name = handle.name,
        );
    }
    s.push('\n');
}

fn workspace_setup(s: &mut String, _p: &BootParams<'_>) {
    s.push_str(
        "WORKSPACE=/workspace/$AGENT_ID\n\
         mkdir -p \"$WORKSPACE\"\n\
         cd \"$WORKSPACE\"\n\n\
         git config --global user.email \"$AGENT_ID@fleet.local\"\n\
         git config --global user.name \"fleet agent $AGENT_ID\"\n\n\
         if [ -n \"$REPO\" ]; then\n\
         \x20   log \"cloning $REPO\"\n\
         \x20   git clone \"$REPO\" project || { finish failed 'git clone failed'; exit 1; }\n\
         \x20   cd project\n\
         \x20   if [ -n \"$BRANCH\" ]; then git checkout -B \"$BRANCH\"; fi\n\
         else\n\
         \x20   mkdir -p project && cd project && git init -q\n\
         fi\n\
         WORKDIR=$PWD\n\n",
    );
}

fn harness_install(s: &mut String, p: &BootParams<'_>) {
    // VMs boot from a bare Ubuntu image; pods ship a prebuilt image.
    if p.backend == Backend::Gce {
        s.push_str(
            "log 'installing harness dependencies'\n\
             apt-get update -qq && apt-get install -y -qq git curl jq ca-certificates gnupg\n\
             mkdir -p /etc/apt/keyrings\n\
             curl -fsSL https://deb.nodesource.com/gpgkey/nodesource-repo.gpg.key | gpg --dearmor -o /etc/apt/keyrings/nodesource.gpg\n\
             echo 'deb [signed-by=/etc/apt/keyrings/nodesource.gpg] https://deb.nodesource.com/node_18.x nodistro main' > /etc/apt/sources.list.d/nodesource.list\n\
             apt-get update -qq && apt-get install -y -qq nodejs\n",
        );
    }
    let package = match p.task.engine {
        TaskEngine::Claude => "@anthropic-ai/claude-code",
        TaskEngine::Codex => "@openai/codex",
    };
    let _ = writeln!(s, "npm install -g {package} || {{ finish failed 'harness install failed'; exit 1; }}");
    s.push('\n');
}

fn task_body(s: &mut String, p: &BootParams<'_>) {
    // The prompt is opaque data: base64 in the script, decoded to a file,
    // handed to the engine by path. No shell ever interprets it.
    let prompt_b64 = B64.encode(p.task.prompt.as_bytes());
    let _ = writeln!(s, "PROMPT_B64={}", sh_quote(&prompt_b64));
    s.push_str("printf '%s' \"$PROMPT_B64\" | base64 -d > \"$WORKSPACE/task.txt\"\n\n");

    let engine_cmd = match p.task.engine {
        TaskEngine::Claude => "claude -p \"$(cat \"$WORKSPACE/task.txt\")\" --dangerously-skip-permissions",
        TaskEngine::Codex => "codex exec \"$(cat \"$WORKSPACE/task.txt\")\"",
    };

    s.push_str("report running 'task starting'\n\n");
    let _ = write!(
        s,
        "cat > \"$WORKSPACE/harness.sh\" <<'HARNESS'\n\
         #!/bin/bash\n\
         # Continuous-session loop: one engine session per iteration,\n\
         # committing between sessions so progress survives restarts.\n\
         i=0\n\
         while :; do\n\
         \x20   i=$((i + 1))\n\
         \x20   if [ \"$MAX_ITERATIONS\" -gt 0 ] && [ \"$i\" -gt \"$MAX_ITERATIONS\" ]; then\n\
         \x20       echo \"reached max iterations ($MAX_ITERATIONS)\"\n\
         \x20       break\n\
         \x20   fi\n\
         \x20   echo \"=== iteration $i ===\"\n\
         \x20   {engine_cmd}\n\
         \x20   git add -A && git commit -q -m \"iteration $i\" || true\n\
         \x20   if [ -f \"$WORKSPACE/task-complete\" ]; then\n\
         \x20       echo 'task reported complete'\n\
         \x20       break\n\
         \x20   fi\n\
         \x20   sleep 5\n\
         done\n\
         HARNESS\n\
         chmod +x \"$WORKSPACE/harness.sh\"\n\n\
         timeout \"$TIMEOUT_SECS\" env WORKSPACE=\"$WORKSPACE\" MAX_ITERATIONS=\"$MAX_ITERATIONS\" \\\n\
         \x20   bash \"$WORKSPACE/harness.sh\" 2>&1 | tee -a /var/log/fleet-agent.log\n\
         RC=${{PIPESTATUS[0]}}\n\n\
         if [ \"$RC\" -eq 124 ]; then\n\
         \x20   log 'task timed out, committing checkpoint'\n\
         \x20   git add -A && git commit -q -m 'checkpoint: timeout budget expired' || true\n\
         \x20   finish failed \"timed out after ${{TIMEOUT_SECS}}s\"\n\
         elif [ \"$RC\" -eq 0 ]; then\n\
         \x20   finish completed 'task finished'\n\
         else\n\
         \x20   finish failed \"task exited with code $RC\"\n\
         fi\n\n",
    );
}

fn teardown(s: &mut String, p: &BootParams<'_>) {
    s.push_str(
        "if [ \"$KEEP_ALIVE\" -eq 1 ]; then\n\
         \x20   log 'keep_alive set, leaving resource up'\n\
         \x20   sleep infinity\n\
         fi\n",
    );
    match p.backend {
        Backend::Gce => s.push_str("log 'shutting down'\nshutdown -h now\n"),
        // Pod teardown is the container exiting.
        Backend::Kubernetes => s.push_str("exit \"$RC\"\n"),
    }
}

/// Shell variable name for a credential: SCREAMING_SNAKE of its store name.
fn shell_var(name: &str) -> String {
    name.to_ascii_uppercase().replace('-', "_")
}

/// Single-quote for bash. Credential names, ids, and urls come from config
/// and validated records, but quoting everything keeps the invariant local.
fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
#[path = "bootscript_tests.rs"]
mod tests;
