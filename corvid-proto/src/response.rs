//! Response rendering. IMAP responses are plain text lines; rather than
//! round-tripping through `imap-codec`'s response types (built for framing
//! a client, not a server answering free-form untagged data), handlers
//! build lines directly and this module only owns the tagged-completion
//! shape every command must end with.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::No => "NO",
            Status::Bad => "BAD",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Response {
    /// `* ...` lines, in the order they must be sent — before the tagged
    /// completion, per RFC 3501.
    pub untagged: Vec<String>,
    pub tag: String,
    pub status: Status,
    pub code: Option<String>,
    pub message: String,
}

impl Response {
    pub fn build(tag: impl Into<String>) -> ResponseBuilder {
        ResponseBuilder {
            tag: tag.into(),
            untagged: Vec::new(),
            code: None,
            message: String::new(),
        }
    }

    /// `* BYE ...` with no tagged completion — the connection closes right
    /// after, per RFC 3501's LOGOUT sequence.
    pub fn bye(message: impl Into<String>) -> Response {
        Response {
            untagged: vec![format!("* BYE {}", message.into())],
            tag: String::new(),
            status: Status::Ok,
            code: None,
            message: String::new(),
        }
    }

    pub fn is_bye(&self) -> bool {
        self.tag.is_empty()
    }

    /// Splices mailbox-change notifications ahead of this response's own
    /// untagged data, as RFC 3501 requires: EXISTS/EXPUNGE/FETCH from the
    /// journal must be visible before the tagged completion of whatever
    /// command happened to trigger the catch-up read.
    pub fn prepend_untagged(mut self, lines: Vec<String>) -> Self {
        if lines.is_empty() {
            return self;
        }
        let mut combined = lines;
        combined.append(&mut self.untagged);
        self.untagged = combined;
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.untagged {
            out.push_str(line);
            out.push_str("\r\n");
        }
        if !self.is_bye() {
            let code = self.code.as_deref().map(|c| format!("[{}] ", c)).unwrap_or_default();
            out.push_str(&format!("{} {} {}{}\r\n", self.tag, self.status.as_str(), code, self.message));
        }
        out
    }
}

pub struct ResponseBuilder {
    tag: String,
    untagged: Vec<String>,
    code: Option<String>,
    message: String,
}

impl ResponseBuilder {
    pub fn untagged(mut self, line: impl Into<String>) -> Self {
        self.untagged.push(line.into());
        self
    }

    pub fn untagged_many(mut self, lines: impl IntoIterator<Item = String>) -> Self {
        self.untagged.extend(lines);
        self
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    fn finish(self, status: Status, message: impl Into<String>) -> Response {
        Response {
            untagged: self.untagged,
            tag: self.tag,
            status,
            code: self.code,
            message: message.into(),
        }
    }

    pub fn ok(self, message: impl Into<String>) -> Response {
        self.finish(Status::Ok, message)
    }

    pub fn no(self, message: impl Into<String>) -> Response {
        self.finish(Status::No, message)
    }

    pub fn bad(self, message: impl Into<String>) -> Response {
        self.finish(Status::Bad, message)
    }
}
