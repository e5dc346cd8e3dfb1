//! The backend (PTY slave) side of a session. The core treats this as an
//! opaque collaborator; a concrete implementation lives in `webtty-pty`.

use std::collections::HashMap;

use async_trait::async_trait;

/// Exposes Read/Write/Close/ResizeTerminal/WindowTitleVariables.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read a chunk of backend output into `buf`, returning the number of
    /// bytes read, or `0` on EOF.
    async fn read(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Write client input to the backend.
    async fn write(&self, data: &[u8]) -> std::io::Result<()>;

    /// Tear down the backend process. Idempotent.
    async fn close(&self) -> std::io::Result<()>;

    /// Resize the backend's terminal geometry.
    async fn resize_terminal(&self, cols: u16, rows: u16) -> std::io::Result<()>;

    /// Name -> opaque value map used to interpolate the window-title
    /// template.
    fn window_title_variables(&self) -> HashMap<String, String>;
}

/// Parsed query-string arguments forwarded from `InitMessage::arguments`
/// when `permit-arguments` is enabled.
pub type BackendArgs = HashMap<String, Vec<String>>;

/// Spawns a `Backend` for an incoming session. The out-of-scope "PTY
/// process factory; only its interface is specified here.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn spawn(
        &self,
        args: &BackendArgs,
        headers: &HashMap<String, String>,
    ) -> Result<Box<dyn Backend>, String>;
}

/// Parse a query-string shaped argument blob (`a=1&b=2&b=3`) into a
/// name -> values map. Malformed percent-encoding
/// is an error, matching `BadArguments`.
pub fn parse_query_args(raw: &str) -> Result<BackendArgs, String> {
    let mut out: BackendArgs = HashMap::new();
    if raw.is_empty() {
        return Ok(out);
    }
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");
        let key = percent_decode(key)?;
        let value = percent_decode(value)?;
        if key.is_empty() {
            return Err(format!("empty argument name in {raw:?}"));
        }
        out.entry(key).or_default().push(value);
    }
    Ok(out)
}

fn percent_decode(s: &str) -> Result<String, String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                if i + 2 >= bytes.len() {
                    return Err(format!("truncated percent-escape in {s:?}"));
                }
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .map_err(|_| format!("invalid percent-escape in {s:?}"))?;
                let byte = u8::from_str_radix(hex, 16)
                    .map_err(|_| format!("invalid percent-escape in {s:?}"))?;
                out.push(byte);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| format!("non-utf8 argument in {s:?}"))
}
