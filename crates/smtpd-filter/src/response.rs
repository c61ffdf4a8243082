/// Verdict returned by a filter request callback.
///
/// Values are opaque; the dispatcher serializes them onto the
/// `filter-result` line. Message and parameter payloads must not contain
/// newlines; that is a contract with the application, not something the
/// engine validates.
pub struct Response(Verdict);

enum Verdict {
    Proceed,
    Junk,
    Reject(String),
    Disconnect(String),
    Rewrite(String),
    Report(String),
}

impl Response {
    /// Let the command through unchanged.
    pub fn proceed() -> Self {
        Self(Verdict::Proceed)
    }

    /// Let the command through but mark the message as spam.
    pub fn junk() -> Self {
        Self(Verdict::Junk)
    }

    /// Refuse the command with an SMTP error line, e.g. `550 go away`.
    pub fn reject(message: impl Into<String>) -> Self {
        Self(Verdict::Reject(message.into()))
    }

    /// Refuse the command and drop the connection.
    pub fn disconnect(message: impl Into<String>) -> Self {
        Self(Verdict::Disconnect(message.into()))
    }

    /// Replace the command's parameter before the host processes it.
    pub fn rewrite(parameter: impl Into<String>) -> Self {
        Self(Verdict::Rewrite(parameter.into()))
    }

    /// Proceed, and record a report event on the session.
    pub fn report(parameter: impl Into<String>) -> Self {
        Self(Verdict::Report(parameter.into()))
    }

    pub(crate) fn encode(&self) -> String {
        match &self.0 {
            Verdict::Proceed => "proceed".to_string(),
            Verdict::Junk => "junk".to_string(),
            Verdict::Reject(message) => format!("reject|{message}"),
            Verdict::Disconnect(message) => format!("disconnect|{message}"),
            Verdict::Rewrite(parameter) => format!("rewrite|{parameter}"),
            Verdict::Report(parameter) => format!("report|{parameter}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encoding() {
        assert_eq!(Response::proceed().encode(), "proceed");
        assert_eq!(Response::junk().encode(), "junk");
        assert_eq!(Response::reject("550 go away").encode(), "reject|550 go away");
        assert_eq!(
            Response::disconnect("421 shutting down").encode(),
            "disconnect|421 shutting down"
        );
        assert_eq!(
            Response::rewrite("<other@example.com>").encode(),
            "rewrite|<other@example.com>"
        );
        assert_eq!(Response::report("flagged").encode(), "report|flagged");
    }
}
