use ariadne::{ColorGenerator, Config, Label, Report, ReportKind, Source};

use super::metadata::{Location, line_of};

/// A dynamic error type that can hold specific error messages and the location where the error happened.
pub trait ReportableError: std::error::Error {
    /// message is used for reporting verbose message for `ariadne`.
    fn get_message(&self) -> String {
        self.to_string()
    }
    /// Label is used for indicating error with the specific position for `ariadne`.
    /// One error may have multiple labels, e.g. an unterminated list points at both
    /// its opening parenthesis and the end of the input.
    fn get_labels(&self) -> Vec<(Location, String)>;
}

/// ReportableError implements `PartialEq` mostly for testing purpose.
impl PartialEq for dyn ReportableError + '_ {
    fn eq(&self, other: &Self) -> bool {
        self.get_labels() == other.get_labels()
    }
}

#[derive(Debug, Clone)]
pub struct SimpleError {
    pub message: String,
    pub span: Location,
}
impl std::fmt::Display for SimpleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl std::error::Error for SimpleError {}
impl ReportableError for SimpleError {
    fn get_labels(&self) -> Vec<(Location, String)> {
        vec![(self.span.clone(), self.message.clone())]
    }
}

/// Render diagnostics for `src`, identified as `name`, with `ariadne`.
///
/// Every report carries a `name:line` note for its first label, which is
/// all that survives when the output is read without the source at hand.
pub fn render_report(
    src: &str,
    name: &str,
    errs: &[Box<dyn ReportableError + '_>],
    color: bool,
) -> String {
    let mut colors = ColorGenerator::new();
    let mut out = Vec::new();
    for e in errs {
        let rawlabels = e.get_labels();
        let Some((first, _)) = rawlabels.first() else {
            out.extend_from_slice(format!("Error: {}\n", e.get_message()).as_bytes());
            continue;
        };
        let labels = rawlabels.iter().map(|(loc, message)| {
            Label::new((name.to_string(), loc.span.clone()))
                .with_message(message)
                .with_color(colors.next())
        });
        let report = Report::build(ReportKind::Error, (name.to_string(), first.span.clone()))
            .with_config(Config::default().with_color(color))
            .with_message(e.get_message())
            .with_labels(labels)
            .with_note(format!("{name}:{}", line_of(src, first.span.start)))
            .finish();
        if let Err(err) = report.write((name.to_string(), Source::from(src)), &mut out) {
            log::error!("failed to render diagnostic: {err}");
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Pretty-print errors to stderr.
pub fn report(src: &str, name: &str, errs: &[Box<dyn ReportableError + '_>]) {
    eprint!("{}", render_report(src, name, errs, true));
}

/// Single-line rendering used by trace output: `path:line: message`, one per error.
pub fn dump_with_lines(src: &str, errs: &[Box<dyn ReportableError + '_>]) -> String {
    errs.iter()
        .map(|e| match e.get_labels().first() {
            Some((loc, _)) => format!(
                "{}:{}: {}",
                loc.path.display(),
                line_of(src, loc.span.start),
                e.get_message()
            ),
            None => e.get_message(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::*;

    fn errors() -> Vec<Box<dyn ReportableError>> {
        let span = Location::new(5..6, PathBuf::from("t.cin"));
        vec![Box::new(SimpleError {
            message: "unknown form".to_string(),
            span,
        })]
    }

    #[test]
    fn rendered_reports_name_the_line() {
        let src = "(a)\n(b c";
        let text = render_report(src, "t.cin", &errors(), false);
        assert!(text.contains("unknown form"));
        assert!(text.contains("t.cin:2"));
    }

    #[test]
    fn dump_prefixes_path_and_line() {
        let src = "(a)\n(b c";
        assert_eq!(dump_with_lines(src, &errors()), "t.cin:2: unknown form");
    }
}
