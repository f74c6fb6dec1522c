use std::{fs, path::Path, time::Duration};

use crate::{credentials::resolver::load_credentials, error::StartError, logging::sink::LogSink};

/// Everything a start request needs, read from the operator's files.
#[derive(Debug, Clone, PartialEq)]
pub struct StartInputs {
    pub credentials: Vec<String>,
    pub target: String,
    pub messages: Vec<String>,
    pub interval: Duration,
}

impl StartInputs {
    /// Reads the credential and message files and works out the interval.
    ///
    /// `target` may name a file whose first non-blank line is the target.
    /// `speed` may be a number of seconds or the path of a file holding one;
    /// anything unusable falls back to `default_interval` with a note in the sink.
    /// Emptiness checks are left to the job manager.
    pub fn load(
        credentials_path: &Path,
        target: &str,
        messages_path: &Path,
        speed: Option<&str>,
        default_interval: Duration,
        sink: &LogSink,
    ) -> Result<Self, StartError> {
        let credentials = load_credentials(credentials_path)?;

        let messages = fs::read(messages_path)
            .map(|bytes| parse_messages(&String::from_utf8_lossy(&bytes)))
            .map_err(|source| StartError::UnreadableMessages {
                path: messages_path.to_path_buf(),
                source,
            })?;

        let interval = match speed.map(str::trim).filter(|raw| !raw.is_empty()) {
            None => default_interval,
            Some(raw) => parse_interval(raw)
                .or_else(|| {
                    fs::read_to_string(raw)
                        .ok()
                        .and_then(|content| parse_interval(&content))
                })
                .unwrap_or_else(|| {
                    sink.info(
                        None,
                        format!(
                            "Could not read interval from '{raw}', using default {:.1}s.",
                            default_interval.as_secs_f64()
                        ),
                    );
                    default_interval
                }),
        };

        Ok(StartInputs {
            credentials,
            target: resolve_target(target),
            messages,
            interval,
        })
    }
}

/// A typed target, unless it names a readable file with a non-blank line in it.
pub fn resolve_target(raw: &str) -> String {
    let raw = raw.trim();
    let path = Path::new(raw);
    if !raw.is_empty() && path.is_file() {
        if let Some(line) = fs::read(path).ok().and_then(|bytes| {
            parse_messages(&String::from_utf8_lossy(&bytes))
                .into_iter()
                .next()
        }) {
            return line;
        }
    }
    raw.to_string()
}

/// Message set: every non-blank line, trimmed, in file order.
pub fn parse_messages(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Interval in (possibly fractional) seconds. `None` for anything that is not
/// a finite, positive number.
pub fn parse_interval(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().parse().ok()?;
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_skip_blank_lines() {
        let messages = parse_messages("hello\n\n   \n  second line  \r\nthird\n");
        assert_eq!(messages, vec!["hello", "second line", "third"]);
    }

    #[test]
    fn empty_message_file_yields_nothing() {
        assert!(parse_messages("").is_empty());
        assert!(parse_messages("\n \n\t\n").is_empty());
    }

    #[test]
    fn interval_accepts_fractions_and_rejects_garbage() {
        assert_eq!(parse_interval("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_interval(" 1.5\n"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_interval("0"), None);
        assert_eq!(parse_interval("-3"), None);
        assert_eq!(parse_interval("NaN"), None);
        assert_eq!(parse_interval("fast"), None);
    }

    fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn inputs_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let cookies = write(dir.path(), "cookies.txt", "sessionid=ABC123;");
        let messages = write(dir.path(), "message.txt", "hello\n\nworld\n");
        let speed = write(dir.path(), "speed.txt", "2\n");
        let sink = LogSink::new(10);

        let inputs = StartInputs::load(
            &cookies,
            " T1 ",
            &messages,
            speed.to_str(),
            Duration::from_secs(5),
            &sink,
        )
        .unwrap();
        assert_eq!(inputs.credentials, vec!["ABC123"]);
        assert_eq!(inputs.target, "T1");
        assert_eq!(inputs.messages, vec!["hello", "world"]);
        assert_eq!(inputs.interval, Duration::from_secs(2));
        assert!(sink.is_empty());
    }

    #[test]
    fn unusable_speed_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let cookies = write(dir.path(), "cookies.txt", "sessionid=ABC123;");
        let messages = write(dir.path(), "message.txt", "hi");
        let sink = LogSink::new(10);

        let inputs = StartInputs::load(
            &cookies,
            "T1",
            &messages,
            Some("warp speed"),
            Duration::from_secs(5),
            &sink,
        )
        .unwrap();
        assert_eq!(inputs.interval, Duration::from_secs(5));
        assert!(sink.all()[0].message.contains("using default 5.0s"));
    }

    #[test]
    fn target_file_overrides_the_typed_value() {
        let dir = tempfile::tempdir().unwrap();
        let cookies = write(dir.path(), "cookies.txt", "sessionid=ABC123;");
        let messages = write(dir.path(), "message.txt", "hi");
        let thread = write(dir.path(), "thread.txt", "\n  340282366841710300949128  \n");
        let sink = LogSink::new(10);

        let inputs = StartInputs::load(
            &cookies,
            thread.to_str().unwrap(),
            &messages,
            None,
            Duration::from_secs(5),
            &sink,
        )
        .unwrap();
        assert_eq!(inputs.target, "340282366841710300949128");
    }

    #[test]
    fn blank_target_file_keeps_the_typed_value() {
        let dir = tempfile::tempdir().unwrap();
        let thread = write(dir.path(), "thread.txt", "  \n");
        let typed = thread.to_str().unwrap();
        assert_eq!(resolve_target(typed), typed);
        assert_eq!(resolve_target(" T1 "), "T1");
        assert_eq!(resolve_target(""), "");
    }

    #[test]
    fn empty_credentials_are_left_for_the_manager_to_reject() {
        let dir = tempfile::tempdir().unwrap();
        let cookies = write(dir.path(), "cookies.txt", "csrftoken=1;");
        let messages = write(dir.path(), "message.txt", "hi");
        let sink = LogSink::new(10);

        let inputs = StartInputs::load(
            &cookies,
            "T1",
            &messages,
            None,
            Duration::from_secs(5),
            &sink,
        )
        .unwrap();
        assert!(inputs.credentials.is_empty());
        assert!(sink.is_empty());
    }

    #[test]
    fn missing_message_file_is_an_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let cookies = write(dir.path(), "cookies.txt", "sessionid=ABC123;");
        let sink = LogSink::new(10);
        let err = StartInputs::load(
            &cookies,
            "T1",
            &dir.path().join("missing.txt"),
            None,
            Duration::from_secs(5),
            &sink,
        )
        .unwrap_err();
        assert!(matches!(err, StartError::UnreadableMessages { .. }));
    }
}
