//! Command templates and result reporting

use std::fmt::Write;

use hostkit_exec::{ExecutionResult, ResultTally};
use hostkit_types::HostRecord;

/// Substitute `{name}`, `{user}`, `{address}` and `{port}` in `template`
///
/// Unknown placeholders are left as written.
pub fn render_template(template: &str, host: &HostRecord) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let value = tail.find('}').and_then(|close| {
            let value = match &tail[1..close] {
                "name" => host.name.clone(),
                "user" => host.user.clone(),
                "address" => host.address.clone(),
                "port" => host.port.to_string(),
                _ => return None,
            };
            Some((value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(&value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Per-host block printed as each result arrives
pub fn format_result(result: &ExecutionResult) -> String {
    let mut out = String::new();
    let status = if result.success() { "ok" } else { "FAILED" };
    let _ = writeln!(
        out,
        ">> [{status}] {} ({}) $ {}  ({:.2?})",
        result.host.name,
        result.host.endpoint(),
        result.command,
        result.duration
    );

    let stdout = result.stdout_lossy();
    if !stdout.is_empty() {
        out.push_str(&stdout);
        if !stdout.ends_with('\n') {
            out.push('\n');
        }
    }

    let stderr = result.stderr_lossy();
    if !stderr.is_empty() {
        out.push_str("-- stderr --\n");
        out.push_str(&stderr);
        if !stderr.ends_with('\n') {
            out.push('\n');
        }
    }

    if let Some(e) = &result.error {
        let _ = writeln!(out, "error: {e}");
    }

    out
}

/// Final success and failure lists
pub fn format_summary(tally: &ResultTally) -> String {
    let succeeded = tally.succeeded();
    let failed = tally.failed();
    format!(
        "\nsuccess ({}): {}\nfailure ({}): {}\n",
        succeeded.len(),
        succeeded.join(", "),
        failed.len(),
        failed.join(", ")
    )
}

/// Numbered JSON listing with passwords masked
pub fn format_hosts(hosts: &[HostRecord]) -> String {
    let mut out = String::new();
    for (i, host) in hosts.iter().enumerate() {
        match serde_json::to_string(&host.redacted()) {
            Ok(json) => {
                let _ = writeln!(out, "{} -> {json}", i + 1);
            }
            Err(_) => {
                let _ = writeln!(out, "{} -> {}", i + 1, host.name);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hostkit_exec::{CommandOutput, ExecError, ResultHandler};

    use super::*;

    fn web1() -> HostRecord {
        HostRecord::new("web1", "deploy", "10.0.0.5")
            .with_port(2222)
            .with_password("hunter2")
    }

    #[test]
    fn test_render_template() {
        assert_eq!(
            render_template("ssh {user}@{address} -p {port} # {name}", &web1()),
            "ssh deploy@10.0.0.5 -p 2222 # web1"
        );
    }

    #[test]
    fn test_render_template_leaves_other_braces() {
        assert_eq!(
            render_template("awk '{print $1}' /etc/{name}.conf {", &web1()),
            "awk '{print $1}' /etc/web1.conf {"
        );
        assert_eq!(render_template("uptime", &web1()), "uptime");
    }

    #[test]
    fn test_render_template_inside_brace_group() {
        assert_eq!(
            render_template("{ echo {name}; }", &web1()),
            "{ echo web1; }"
        );
        assert_eq!(
            render_template("awk '{print \"{address}\", $1}'", &web1()),
            "awk '{print \"10.0.0.5\", $1}'"
        );
        assert_eq!(render_template("{{port}}", &web1()), "{2222}");
    }

    #[test]
    fn test_format_result_success() {
        let output = CommandOutput {
            stdout: b"up 3 days".to_vec(),
            exit_status: Some(0),
            ..Default::default()
        };
        let result = ExecutionResult::from_output(web1(), "uptime".into(), output, Duration::ZERO);

        let text = format_result(&result);
        assert!(text.starts_with(">> [ok] web1 (10.0.0.5:2222) $ uptime"));
        assert!(text.contains("up 3 days\n"));
        assert!(!text.contains("error:"));
    }

    #[test]
    fn test_format_result_failure() {
        let result = ExecutionResult::failed(
            web1(),
            "uptime".into(),
            ExecError::AuthenticationFailed("denied".into()),
            Duration::ZERO,
        );

        let text = format_result(&result);
        assert!(text.contains("[FAILED]"));
        assert!(text.contains("error: authentication failed: denied"));
    }

    #[test]
    fn test_format_summary() {
        let tally = ResultTally::new();
        tally.handle(ExecutionResult::failed(
            web1(),
            String::new(),
            ExecError::Cancelled,
            Duration::ZERO,
        ));

        assert_eq!(
            format_summary(&tally),
            "\nsuccess (0): \nfailure (1): web1\n"
        );
    }

    #[test]
    fn test_format_hosts_masks_password() {
        let text = format_hosts(&[web1(), HostRecord::new("db", "root", "db.lan").with_key_path("/k")]);

        assert!(text.starts_with("1 -> {"));
        assert!(text.contains("\n2 -> {"));
        assert!(!text.contains("hunter2"));
        assert!(text.contains("****"));
    }
}
