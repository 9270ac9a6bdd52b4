// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human-readable rendering of process and daemon state.

use od_core::ProcessInfo;

/// Render seconds as a compact duration (`45s`, `3m12s`, `2h05m`, `4d01h`).
pub fn format_uptime(secs: u64) -> String {
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    let (mins, secs) = (rem / 60, rem % 60);
    if days > 0 {
        format!("{days}d{hours:02}h")
    } else if hours > 0 {
        format!("{hours}h{mins:02}m")
    } else if mins > 0 {
        format!("{mins}m{secs:02}s")
    } else {
        format!("{secs}s")
    }
}

/// Render the process list as an aligned table.
pub fn render_process_table(infos: &[ProcessInfo]) -> String {
    if infos.is_empty() {
        return "no processes\n".to_string();
    }

    let headers = ["ID", "NAME", "STATUS", "MODE", "PID", "INSTANCES", "RESTARTS", "UPTIME"];
    let rows: Vec<[String; 8]> = infos
        .iter()
        .map(|info| {
            [
                info.id.to_string(),
                info.name.clone(),
                info.status.to_string(),
                info.mode.to_string(),
                info.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                format!("{}/{}", info.running_instances, info.instances),
                info.restart_count.to_string(),
                format_uptime(info.uptime),
            ]
        })
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let mut out = String::new();
    for (i, header) in headers.iter().enumerate() {
        out.push_str(&format!("{:<width$}  ", header, width = widths[i]));
    }
    out.push('\n');
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            out.push_str(&format!("{:<width$}  ", cell, width = widths[i]));
        }
        out.push('\n');
    }
    out
}

/// Render one process in detail.
pub fn render_process_detail(info: &ProcessInfo) -> String {
    let mut out = String::new();
    out.push_str(&format!("name:      {}\n", info.name));
    out.push_str(&format!("id:        {}\n", info.id));
    out.push_str(&format!("status:    {}\n", info.status));
    out.push_str(&format!("mode:      {}\n", info.mode));
    out.push_str(&format!("script:    {}\n", info.script.display()));
    if let Some(cwd) = &info.cwd {
        out.push_str(&format!("cwd:       {}\n", cwd.display()));
    }
    out.push_str(&format!(
        "instances: {}/{}\n",
        info.running_instances, info.instances
    ));
    if !info.pids.is_empty() {
        let pids: Vec<String> = info.pids.iter().map(u32::to_string).collect();
        out.push_str(&format!("pids:      {}\n", pids.join(", ")));
    }
    out.push_str(&format!("restarts:  {}\n", info.restart_count));
    out.push_str(&format!("uptime:    {}\n", format_uptime(info.uptime)));
    out
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
