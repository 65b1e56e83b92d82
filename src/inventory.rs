use std::time::Duration;

use serde_json::{json, Value};

use crate::error::SshError;
use crate::ssh_pool::{Credential, PoolKey, SshPool};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Fixed, read-only command set run once per host over a direct
/// (unpooled) session. Unlike the task engine, inventory collection
/// never accepts an operator-supplied command string.
pub async fn collect(
    ssh: &SshPool,
    key: &PoolKey,
    credential: &Credential,
) -> Result<Value, SshError> {
    let uname_s = run(ssh, key, credential, "uname -s 2>/dev/null").await?;
    let uname_r = run(ssh, key, credential, "uname -r 2>/dev/null").await?;
    let hostname = run(ssh, key, credential, "hostname 2>/dev/null").await?;
    let uptime = run(ssh, key, credential, "cat /proc/uptime 2>/dev/null").await?;
    let meminfo = run(ssh, key, credential, "cat /proc/meminfo 2>/dev/null").await?;
    let disk = run(ssh, key, credential, "df -BG / 2>/dev/null | tail -1").await?;
    let interfaces = run(
        ssh,
        key,
        credential,
        "ip -o link show 2>/dev/null | awk -F': ' '{print $2}'",
    )
    .await?;
    let services = run(
        ssh,
        key,
        credential,
        "systemctl list-units --type=service --state=running --no-pager --no-legend 2>/dev/null | wc -l",
    )
    .await?;

    Ok(json!({
        "os": { "name": uname_s.trim(), "kernel": uname_r.trim() },
        "hostname": hostname.trim(),
        "uptime_seconds": parse_uptime_seconds(&uptime),
        "memory": parse_meminfo(&meminfo),
        "disk_root": parse_df_line(&disk),
        "network_interfaces": interfaces
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>(),
        "running_services": services.trim().parse::<u64>().unwrap_or(0),
    }))
}

async fn run(ssh: &SshPool, key: &PoolKey, credential: &Credential, command: &str) -> Result<String, SshError> {
    let (_, stdout, _) = ssh.exec(key, credential, command, DEFAULT_COMMAND_TIMEOUT).await?;
    Ok(String::from_utf8_lossy(&stdout).to_string())
}

fn parse_uptime_seconds(raw: &str) -> Option<f64> {
    raw.trim().split_whitespace().next()?.parse().ok()
}

fn parse_meminfo(raw: &str) -> Value {
    let mut total_kb = None;
    let mut available_kb = None;
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total_kb = rest.trim().split_whitespace().next().and_then(|v| v.parse::<u64>().ok());
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available_kb = rest.trim().split_whitespace().next().and_then(|v| v.parse::<u64>().ok());
        }
    }
    json!({ "total_kb": total_kb, "available_kb": available_kb })
}

fn parse_df_line(raw: &str) -> Value {
    let fields: Vec<&str> = raw.split_whitespace().collect();
    if fields.len() < 5 {
        return Value::Null;
    }
    json!({
        "filesystem": fields[0],
        "size": fields[1],
        "used": fields[2],
        "available": fields[3],
        "use_percent": fields[4],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_meminfo_block() {
        let raw = "MemTotal:       16384000 kB\nMemFree:         100000 kB\nMemAvailable:   12000000 kB\n";
        let parsed = parse_meminfo(raw);
        assert_eq!(parsed["total_kb"], 16384000);
        assert_eq!(parsed["available_kb"], 12000000);
    }

    #[test]
    fn parses_df_tail_line() {
        let raw = "/dev/sda1        40G   12G   26G  32% /\n";
        let parsed = parse_df_line(raw);
        assert_eq!(parsed["use_percent"], "32%");
    }

    #[test]
    fn parses_uptime_seconds_from_proc_uptime() {
        assert_eq!(parse_uptime_seconds("12345.67 9999.00\n"), Some(12345.67));
    }
}
