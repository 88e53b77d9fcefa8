//! Process Discovery (C6).
//!
//! Finds this runner's own hypervisor processes, sibling runners, and
//! mitmproxy helpers by scanning `/proc` rather than tracking PIDs
//! in-memory, so a cold-started runner can recognize state left behind by a
//! prior crash. Parsing is kept pure (argv/stat text in, struct out) so it
//! is exercised in tests without a real process table.

use std::fs;
use std::process::Command;

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ProcessDiscoveryError {
    #[error("failed to read process table: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirecrackerProcessInfo {
    pub pid: i32,
    pub vm_id: String,
    pub base_dir: String,
    pub is_orphan: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MitmproxyProcessInfo {
    pub pid: i32,
    pub base_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerProcessInfo {
    pub pid: i32,
}

/// Every currently-running hypervisor process this heuristic can see,
/// regardless of which runner started it.
pub fn find_firecracker_processes() -> Result<Vec<FirecrackerProcessInfo>, ProcessDiscoveryError> {
    let mut found = Vec::new();
    for pid in list_pids()? {
        let Some(argv) = read_cmdline(pid) else { continue };
        let Some((vm_id, base_dir)) = parse_hypervisor_argv(&argv) else {
            continue;
        };
        let is_orphan = read_parent_pid(pid) == Some(1);
        found.push(FirecrackerProcessInfo {
            pid,
            vm_id,
            base_dir,
            is_orphan,
        });
    }
    Ok(found)
}

pub fn find_process_by_vm_id(vm_id: &str) -> Result<Option<FirecrackerProcessInfo>, ProcessDiscoveryError> {
    Ok(find_firecracker_processes()?.into_iter().find(|p| p.vm_id == vm_id))
}

pub fn find_mitmproxy_processes() -> Result<Vec<MitmproxyProcessInfo>, ProcessDiscoveryError> {
    let mut found = Vec::new();
    for pid in list_pids()? {
        let Some(argv) = read_cmdline(pid) else { continue };
        if let Some(base_dir) = parse_mitmproxy_argv(&argv) {
            found.push(MitmproxyProcessInfo { pid, base_dir });
        }
    }
    Ok(found)
}

pub fn find_runner_processes() -> Result<Vec<RunnerProcessInfo>, ProcessDiscoveryError> {
    let mut found = Vec::new();
    for pid in list_pids()? {
        let Some(argv) = read_cmdline(pid) else { continue };
        let matches = parse_runner_argv(&argv) || (looks_like_node_runner(&argv) && cwd_has_runner_yaml(pid));
        if matches {
            found.push(RunnerProcessInfo { pid });
        }
    }
    Ok(found)
}

/// Startup reaping, per §4.6: scan for hypervisor processes left behind by a
/// crashed prior run (parented to pid 1) and kill them so their TAP/overlay
/// slots don't sit forever marked in-use by a process nobody is tracking.
/// Returns the VmIds it killed.
pub fn reap_orphan_hypervisors() -> Result<Vec<String>, ProcessDiscoveryError> {
    let mut reaped = Vec::new();
    for proc in find_firecracker_processes()? {
        if !proc.is_orphan {
            continue;
        }
        if let Err(e) = kill_pid(proc.pid) {
            warn!(pid = proc.pid, vm_id = %proc.vm_id, error = %e, "failed to kill orphaned hypervisor process");
            continue;
        }
        warn!(pid = proc.pid, vm_id = %proc.vm_id, "reaped orphaned hypervisor process from a prior run");
        reaped.push(proc.vm_id);
    }
    Ok(reaped)
}

fn kill_pid(pid: i32) -> Result<(), ProcessDiscoveryError> {
    let output = Command::new("kill").arg("-9").arg(pid.to_string()).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(pid, stderr, "kill(1) reported failure (process may already be gone)");
    }
    Ok(())
}

fn list_pids() -> Result<Vec<i32>, ProcessDiscoveryError> {
    let mut pids = Vec::new();
    for entry in fs::read_dir("/proc")?.flatten() {
        if let Some(name) = entry.file_name().to_str() {
            if let Ok(pid) = name.parse::<i32>() {
                pids.push(pid);
            }
        }
    }
    Ok(pids)
}

fn read_cmdline(pid: i32) -> Option<Vec<String>> {
    let raw = fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    if raw.is_empty() {
        return None;
    }
    Some(
        raw.split(|&b| b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect(),
    )
}

fn read_parent_pid(pid: i32) -> Option<i32> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_ppid_from_stat(&stat)
}

fn cwd_has_runner_yaml(pid: i32) -> bool {
    fs::read_link(format!("/proc/{pid}/cwd"))
        .map(|cwd| cwd.join("runner.yaml").exists())
        .unwrap_or(false)
}

/// The comm field is wrapped in parentheses and may itself contain `)`
/// (e.g. a process renamed to include one), so the PPID field is found by
/// keying off the *last* `)` in the line rather than the first.
fn parse_ppid_from_stat(stat: &str) -> Option<i32> {
    let last_paren = stat.rfind(')')?;
    let rest = stat.get(last_paren + 1..)?.trim_start();
    let mut fields = rest.split_whitespace();
    fields.next()?; // state
    fields.next()?.parse().ok()
}

/// First argv token must contain `firecracker`. Look for `--api-sock` or
/// `--config-file`, extract the `vm0-{hex}` path segment to recover the
/// VmId and everything before `/workspaces/vm0-…/` as the base dir.
fn parse_hypervisor_argv(argv: &[String]) -> Option<(String, String)> {
    if !argv.first()?.contains("firecracker") {
        return None;
    }
    argv.windows(2)
        .find(|pair| pair[0] == "--api-sock" || pair[0] == "--config-file")
        .and_then(|pair| extract_vm_id_and_base_dir(&pair[1]))
}

fn extract_vm_id_and_base_dir(path: &str) -> Option<(String, String)> {
    const MARKER: &str = "/workspaces/vm0-";
    let idx = path.find(MARKER)?;
    let base_dir = path[..idx].to_string();
    let rest = &path[idx + MARKER.len()..];
    let vm_id = rest.split('/').next()?.to_string();
    if vm_id.is_empty() {
        return None;
    }
    Some((vm_id, base_dir))
}

fn parse_mitmproxy_argv(argv: &[String]) -> Option<String> {
    let first = argv.first()?;
    if !(first.contains("mitmproxy") || first.contains("mitmdump")) {
        return None;
    }
    argv.iter().find_map(|arg| {
        arg.strip_prefix("vm0_registry_path=")
            .and_then(|rest| rest.strip_suffix("/vm-registry.json"))
            .map(str::to_string)
    })
}

fn parse_runner_argv(argv: &[String]) -> bool {
    let has_start_or_benchmark = argv.iter().any(|a| a == "start" || a == "benchmark");
    if !has_start_or_benchmark {
        return false;
    }
    argv.iter()
        .position(|a| a == "--config")
        .and_then(|idx| argv.get(idx + 1))
        .is_some_and(|value| value.ends_with(".yaml"))
}

fn looks_like_node_runner(argv: &[String]) -> bool {
    argv.len() >= 2 && argv[0].contains("node") && argv[1].ends_with("index.js")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hypervisor_argv_with_api_sock() {
        let argv = vec![
            "firecracker".to_string(),
            "--api-sock".to_string(),
            "/srv/foo/workspaces/vm0-cafebabe/firecracker.sock".to_string(),
        ];
        let (vm_id, base_dir) = parse_hypervisor_argv(&argv).unwrap();
        assert_eq!(vm_id, "cafebabe");
        assert_eq!(base_dir, "/srv/foo");
    }

    #[test]
    fn rejects_argv_whose_first_token_is_not_firecracker() {
        let argv = vec!["mitmdump".to_string(), "--api-sock".to_string(), "/x/workspaces/vm0-ab/s".to_string()];
        assert!(parse_hypervisor_argv(&argv).is_none());
    }

    #[test]
    fn parses_hypervisor_argv_with_config_file() {
        let argv = vec![
            "/usr/bin/firecracker".to_string(),
            "--config-file".to_string(),
            "/data/workspaces/vm0-1234abcd/config.json".to_string(),
        ];
        let (vm_id, base_dir) = parse_hypervisor_argv(&argv).unwrap();
        assert_eq!(vm_id, "1234abcd");
        assert_eq!(base_dir, "/data");
    }

    #[test]
    fn parses_mitmproxy_argv() {
        let argv = vec![
            "mitmdump".to_string(),
            "-s".to_string(),
            "script.py".to_string(),
            "vm0_registry_path=/srv/foo/vm-registry.json".to_string(),
        ];
        assert_eq!(parse_mitmproxy_argv(&argv), Some("/srv/foo".to_string()));
    }

    #[test]
    fn parses_runner_argv_start_with_config() {
        let argv = vec![
            "runner".to_string(),
            "start".to_string(),
            "--config".to_string(),
            "runner.yaml".to_string(),
        ];
        assert!(parse_runner_argv(&argv));
    }

    #[test]
    fn parse_runner_argv_rejects_non_yaml_config() {
        let argv = vec![
            "runner".to_string(),
            "benchmark".to_string(),
            "--config".to_string(),
            "runner.json".to_string(),
        ];
        assert!(!parse_runner_argv(&argv));
    }

    #[test]
    fn looks_like_node_runner_detects_index_js() {
        let argv = vec!["node".to_string(), "index.js".to_string()];
        assert!(looks_like_node_runner(&argv));
        assert!(!looks_like_node_runner(&["node".to_string(), "other.js".to_string()]));
    }

    #[test]
    fn ppid_parsing_handles_closing_paren_inside_comm_field() {
        // comm field itself contains `)`: "(weird)proc)" — parsing must key
        // off the *last* `)` in the line, not the first.
        let stat = "1234 (weird)proc) S 1 1234 1234 0 -1 4194560 100 0 0 0 0 0 0 0 20 0 1 0";
        assert_eq!(parse_ppid_from_stat(stat), Some(1));
    }

    #[test]
    fn ppid_parsing_handles_ordinary_comm_field() {
        let stat = "42 (firecracker) S 7 42 42 0 -1 4194304 50 0 0 0 0 0 0 0 20 0 1 0";
        assert_eq!(parse_ppid_from_stat(stat), Some(7));
    }

    #[test]
    fn malformed_stat_line_returns_none() {
        assert_eq!(parse_ppid_from_stat("no parens here"), None);
    }

    #[test]
    fn find_firecracker_processes_can_read_the_live_process_table() {
        // Exercises the real /proc scan end to end; the current test process
        // is not firecracker, so it should simply be filtered out.
        let found = find_firecracker_processes().unwrap();
        let own_pid = std::process::id() as i32;
        assert!(!found.iter().any(|p| p.pid == own_pid));
    }

    #[test]
    fn find_process_by_vm_id_returns_none_for_unknown_id() {
        assert_eq!(find_process_by_vm_id("ffffffff").unwrap(), None);
    }

    #[test]
    fn reap_orphan_hypervisors_finds_nothing_in_the_live_process_table() {
        // No firecracker processes exist in the test environment, so this
        // just exercises the scan-then-kill path end to end without a real
        // orphan to kill.
        assert_eq!(reap_orphan_hypervisors().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn kill_pid_on_an_already_gone_pid_does_not_error() {
        // PID 1 is never one of our own children; a huge unlikely pid stands
        // in for "already exited" without touching anything real.
        kill_pid(i32::MAX - 1).unwrap();
    }
}
