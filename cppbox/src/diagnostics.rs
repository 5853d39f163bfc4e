use regex::Regex;

use crate::types::{Diagnostic, Severity};

/// Extract structured markers from raw compiler stderr.
///
/// Matches lines of the form `<file>:<line>:<col>: <severity>: <message>`
/// anchored to the known generated source file name, so diagnostics that
/// reference other paths (system headers, linker chatter) are left to the
/// raw text the caller returns alongside. Toolchain emission order is
/// preserved; malformed or absent matches yield an empty list, not an error.
pub fn parse_diagnostics(raw_stderr: &str, source_file_name: &str) -> Vec<Diagnostic> {
    if source_file_name.is_empty() {
        return Vec::new();
    }

    let pattern = format!(
        r"(?m)^(?:.*[/\\])?{}:(\d+):(\d+):\s+(error|warning):\s+(.*)$",
        regex::escape(source_file_name)
    );
    let Ok(matcher) = Regex::new(&pattern) else {
        return Vec::new();
    };

    matcher
        .captures_iter(raw_stderr)
        .filter_map(|caps| {
            let line = caps[1].parse().ok()?;
            let column = caps[2].parse().ok()?;
            let severity = match &caps[3] {
                "error" => Severity::Error,
                _ => Severity::Warning,
            };
            Some(Diagnostic {
                line,
                column,
                severity,
                message: caps[4].trim_end().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_error_markers() {
        let stderr = "/tmp/scratch/job-1.cpp: In function 'int main()':\n\
             /tmp/scratch/job-1.cpp:1:18: error: expected ';' before '}' token\n\
             /tmp/scratch/job-1.cpp:1:18: note: suggested fix\n";
        let markers = parse_diagnostics(stderr, "job-1.cpp");
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].line, 1);
        assert_eq!(markers[0].column, 18);
        assert_eq!(markers[0].severity, Severity::Error);
        assert_eq!(markers[0].message, "expected ';' before '}' token");
    }

    #[test]
    fn preserves_toolchain_order() {
        let stderr = "job-2.cpp:4:3: warning: unused variable 'x' [-Wunused-variable]\n\
             job-2.cpp:7:1: error: expected declaration\n\
             job-2.cpp:2:9: warning: comparison is always true\n";
        let markers = parse_diagnostics(stderr, "job-2.cpp");
        let lines: Vec<u32> = markers.iter().map(|m| m.line).collect();
        assert_eq!(lines, vec![4, 7, 2]);
        assert_eq!(markers[1].severity, Severity::Error);
    }

    #[test]
    fn ignores_diagnostics_for_other_files() {
        let stderr = "/usr/include/c++/13/iostream:39:10: error: conflicting declaration\n\
             job-3.cpp:5:2: warning: statement has no effect\n";
        let markers = parse_diagnostics(stderr, "job-3.cpp");
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].severity, Severity::Warning);
    }

    #[test]
    fn malformed_text_yields_no_markers() {
        assert!(parse_diagnostics("", "job-4.cpp").is_empty());
        assert!(parse_diagnostics("collect2: error: ld returned 1 exit status", "job-4.cpp")
            .is_empty());
        assert!(parse_diagnostics("job-4.cpp:not:a:marker", "job-4.cpp").is_empty());
    }
}
