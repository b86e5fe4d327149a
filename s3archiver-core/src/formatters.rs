//! Line decorators used by producers before handing bytes to the archiving backend.
//!
//! These are external formatters in the sense of the pipeline's own contract: `put_data` never
//! calls into this module, it only ever sees the bytes a formatter already produced. Kept here
//! because producers in this workspace need *some* implementation of the two documented shapes.

use chrono::Utc;

/// Formats a line as plain text, prepending the log's token.
#[derive(Debug, Clone)]
pub struct FormatPlain {
    token: String,
}

impl FormatPlain {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }

    pub fn format_line(&self, line: &str) -> String {
        format!("{}{}", self.token, line)
    }
}

/// Formats a line per (an abbreviated) Syslog RFC 5424 framing. The hostname is taken from the
/// caller or falls back to the local hostname.
#[derive(Debug, Clone)]
pub struct FormatSyslog {
    hostname: String,
    appname: String,
    token: String,
    send_datahub: bool,
}

impl FormatSyslog {
    pub fn new(hostname: Option<String>, appname: impl Into<String>, token: impl Into<String>, send_datahub: bool) -> Self {
        let hostname = hostname.unwrap_or_else(local_hostname);
        Self {
            hostname,
            appname: appname.into(),
            token: token.into(),
            send_datahub,
        }
    }

    pub fn format_line(&self, line: &str, msgid: Option<&str>, token: Option<&str>) -> String {
        let msgid = msgid.unwrap_or("-");
        let token = token.filter(|t| !t.is_empty()).unwrap_or(&self.token);

        let token_param = if self.send_datahub { "" } else { token };

        format!(
            "{}<14>1 {}Z {} {} - {} - hostname={} appname={} {}",
            token_param,
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f"),
            self.hostname,
            self.appname,
            msgid,
            self.hostname,
            self.appname,
            line,
        )
    }
}

/// Best-effort local hostname, used both by [`FormatSyslog`] and by the pipeline's staging
/// file naming (`amazon_s3_<hostname>_<token>_<log_name>`).
pub fn local_hostname() -> String {
    hostname_impl().unwrap_or_else(|| "localhost".to_string())
}

#[cfg(unix)]
fn hostname_impl() -> Option<String> {
    let mut buf = vec![0u8; 256];
    // SAFETY: buf is a valid, sufficiently large buffer; gethostname null-terminates on success.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return None;
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8(buf[..len].to_vec()).ok()
}

#[cfg(not(unix))]
fn hostname_impl() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}
