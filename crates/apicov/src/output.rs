//! Output formatting for coverage reports

use crate::suggestions::suggest_similar_endpoints;
use apicov_core::{CoverageReport, HTTP_METHODS};
use eyre::{Result, WrapErr};
use owo_colors::OwoColorize;

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Markdown,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            "markdown" | "md" => Some(Self::Markdown),
            _ => None,
        }
    }
}

/// Render a coverage report in the specified format
pub fn render_report(report: &CoverageReport, format: OutputFormat, verbose: bool) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(report, verbose)),
        OutputFormat::Json => {
            serde_json::to_string_pretty(report).wrap_err("Failed to serialize coverage report")
        }
        OutputFormat::Markdown => Ok(render_markdown(report, verbose)),
    }
}

fn declared(report: &CoverageReport) -> impl Iterator<Item = &str> {
    report
        .endpoints
        .tested
        .iter()
        .chain(&report.endpoints.untested)
        .map(String::as_str)
}

fn suggestions_for(report: &CoverageReport, extra: &str) -> Vec<String> {
    suggest_similar_endpoints(extra, declared(report), 3)
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn render_text(report: &CoverageReport, verbose: bool) -> String {
    let mut output = String::new();

    output.push('\n');
    output.push_str(&format!("{} {}\n", "##".bold(), "API Coverage Report".cyan().bold()));
    output.push('\n');

    let summary = &report.summary;
    let percent = report.coverage_percent();
    let percent_str = format!("{:.2}%", percent);
    let color_percent = if percent >= 80.0 {
        percent_str.green().to_string()
    } else if percent >= 50.0 {
        percent_str.yellow().to_string()
    } else {
        percent_str.red().to_string()
    };
    output.push_str(&format!(
        "Coverage: {} ({}/{} endpoints)\n",
        color_percent, summary.tested_endpoints, summary.total_endpoints
    ));

    let breakdown: Vec<String> = HTTP_METHODS
        .iter()
        .filter_map(|m| {
            let c = report.method_coverage.get(*m)?;
            (c.total > 0).then(|| format!("{} {}/{}", m, c.tested, c.total))
        })
        .collect();
    if !breakdown.is_empty() {
        output.push_str(&format!("  By method: {}\n", breakdown.join(", ").dimmed()));
    }
    output.push('\n');

    let errors = &report.server_error_stats;
    if !errors.errors_by_endpoint.is_empty() {
        output.push_str(&format!(
            "{} Server Errors ({}):\n",
            "!".red().bold(),
            errors.total_server_errors
        ));
        for e in &errors.errors_by_endpoint {
            let codes: Vec<String> = e.status_codes.keys().cloned().collect();
            output.push_str(&format!(
                "  {} {} - {} ({})\n",
                "-".red(),
                e.endpoint,
                e.count,
                codes.join(", ").yellow()
            ));
            if verbose {
                if let Some(message) = &e.last_error_message {
                    output.push_str(&format!("      {}\n", message.dimmed()));
                }
            }
        }
        output.push('\n');
    }

    if !report.endpoints.untested.is_empty() {
        output.push_str(&format!(
            "{} Untested Endpoints ({}):\n",
            "?".yellow().bold(),
            report.endpoints.untested.len()
        ));
        for key in &report.endpoints.untested {
            output.push_str(&format!("  {} {}\n", "-".yellow(), key.dimmed()));
        }
        output.push('\n');
    }

    if !report.extra_endpoints.is_empty() {
        output.push_str(&format!(
            "{} Undeclared Endpoints ({}):\n",
            "+".magenta().bold(),
            report.extra_endpoints.len()
        ));
        for key in &report.extra_endpoints {
            let suggestions = suggestions_for(report, key);
            if suggestions.is_empty() {
                output.push_str(&format!("  {} {}\n", "-".magenta(), key));
            } else {
                output.push_str(&format!(
                    "  {} {} (did you mean: {})\n",
                    "-".magenta(),
                    key,
                    suggestions.join(", ").green()
                ));
            }
        }
        output.push('\n');
    }

    if verbose && !report.endpoints.tested.is_empty() {
        output.push_str(&format!(
            "{} Tested Endpoints ({}):\n",
            "✓".green().bold(),
            report.endpoints.tested.len()
        ));
        for key in &report.endpoints.tested {
            output.push_str(&format!("  {} {}\n", "-".green(), key));
        }
        output.push('\n');
    }

    output
}

fn render_markdown(report: &CoverageReport, verbose: bool) -> String {
    let mut output = String::new();

    output.push_str("# API Coverage Report\n\n");

    let summary = &report.summary;
    output.push_str(&format!(
        "**Coverage:** {:.2}% ({}/{} endpoints)\n\n",
        report.coverage_percent(),
        summary.tested_endpoints,
        summary.total_endpoints
    ));

    output.push_str("| Method | Tested | Total | Coverage |\n");
    output.push_str("|--------|--------|-------|----------|\n");
    for method in HTTP_METHODS {
        if let Some(c) = report.method_coverage.get(method) {
            if c.total > 0 {
                output.push_str(&format!(
                    "| {} | {} | {} | {:.2}% |\n",
                    method, c.tested, c.total, c.percentage
                ));
            }
        }
    }
    output.push('\n');

    let errors = &report.server_error_stats;
    if !errors.errors_by_endpoint.is_empty() {
        output.push_str(&format!(
            "## Server Errors ({})\n\n",
            errors.total_server_errors
        ));
        output.push_str("| Endpoint | Count | Status codes | Last message |\n");
        output.push_str("|----------|-------|--------------|--------------|\n");
        for e in &errors.errors_by_endpoint {
            let codes: Vec<String> = e
                .status_codes
                .iter()
                .map(|(code, n)| format!("{code} x{n}"))
                .collect();
            output.push_str(&format!(
                "| `{}` | {} | {} | {} |\n",
                e.endpoint,
                e.count,
                codes.join(", "),
                e.last_error_message
                    .as_deref()
                    .unwrap_or("")
                    .replace('|', "\\|")
            ));
        }
        output.push('\n');
    }

    if !report.endpoints.untested.is_empty() {
        output.push_str(&format!(
            "## Untested Endpoints ({})\n\n",
            report.endpoints.untested.len()
        ));
        for key in &report.endpoints.untested {
            output.push_str(&format!("- `{}`\n", key));
        }
        output.push('\n');
    }

    if !report.extra_endpoints.is_empty() {
        output.push_str(&format!(
            "## Undeclared Endpoints ({})\n\n",
            report.extra_endpoints.len()
        ));
        for key in &report.extra_endpoints {
            let suggestions = suggestions_for(report, key);
            if suggestions.is_empty() {
                output.push_str(&format!("- `{}`\n", key));
            } else {
                let quoted: Vec<String> = suggestions.iter().map(|s| format!("`{s}`")).collect();
                output.push_str(&format!("- `{}` (did you mean {})\n", key, quoted.join(", ")));
            }
        }
        output.push('\n');
    }

    if verbose && !report.endpoints.tested.is_empty() {
        output.push_str(&format!(
            "## Tested Endpoints ({})\n\n",
            report.endpoints.tested.len()
        ));
        for key in &report.endpoints.tested {
            output.push_str(&format!("- `{}`\n", key));
        }
        output.push('\n');
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use apicov_core::{Aggregate, EndpointKey, ErrorMap, ReportBuilder, SpecIndex};

    fn sample_report() -> CoverageReport {
        let spec = SpecIndex::parse(
            r#"{"paths": {"/users": {"get": {}, "post": {}}, "/users/{id}": {"get": {}}}}"#,
        )
        .unwrap();
        let mut errors = ErrorMap::new();
        errors
            .entry("GET /users/{id}".into())
            .or_default()
            .record(503, Some("upstream | timeout"), 1);
        let aggregate = Aggregate {
            hits: ["GET /users/{id}", "GET /userz"]
                .iter()
                .map(|k| EndpointKey::parse(k).unwrap())
                .collect(),
            errors,
        };
        ReportBuilder::new(&spec)
            .with_timestamp("2026-01-01T00:00:00Z")
            .build(&aggregate)
    }

    #[test]
    fn format_names() {
        assert_eq!(OutputFormat::parse("JSON"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("md"), Some(OutputFormat::Markdown));
        assert_eq!(OutputFormat::parse("html"), None);
    }

    #[test]
    fn text_lists_gaps_and_suggestions() {
        let text = render_report(&sample_report(), OutputFormat::Text, false).unwrap();
        assert!(text.contains("33.33%"), "{text}");
        assert!(text.contains("GET /userz"));
        assert!(text.contains("did you mean"));
        assert!(text.contains("POST /users"));
        assert!(!text.contains("upstream"));

        let verbose = render_report(&sample_report(), OutputFormat::Text, true).unwrap();
        assert!(verbose.contains("upstream | timeout"));
    }

    #[test]
    fn markdown_has_method_table() {
        let md = render_report(&sample_report(), OutputFormat::Markdown, false).unwrap();
        assert!(md.contains("| GET | 1 | 2 | 50.00% |"), "{md}");
        assert!(md.contains("| POST | 0 | 1 | 0.00% |"));
        assert!(md.contains("upstream \\| timeout"));
        assert!(md.contains("- `GET /userz` (did you mean `GET /users`)"));
    }

    #[test]
    fn json_is_the_report() {
        let json = render_report(&sample_report(), OutputFormat::Json, false).unwrap();
        let back: CoverageReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample_report());
    }
}
