//! `GameSurface` over the Chrome DevTools Protocol.
//!
//! Connects to a page's DevTools WebSocket (`ws://host:port/devtools/page/<id>`)
//! and drives it with small `Runtime.evaluate` scripts. The connection is
//! blocking: one command in flight, events in between are skipped. A dropped
//! connection is redialed on the next command.

use crate::error::SurfaceError;
use crate::surface::{GameSurface, TextElement};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io;
use std::net::TcpStream;
use std::time::Duration;
use tracing::{debug, info, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// CSS selectors locating the game's elements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PageSelectors {
    pub text_field: String,
    pub words: String,
    pub controls_container: String,
    pub controls: String,
}

impl Default for PageSelectors {
    fn default() -> Self {
        Self {
            text_field: r#"input[type="text"]"#.to_string(),
            words: r#"div[class*="text-"]"#.to_string(),
            controls_container: ".space-y-3".to_string(),
            controls: "button".to_string(),
        }
    }
}

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

fn dial(ws_url: &str) -> Result<Socket, SurfaceError> {
    info!(url = ws_url, "connecting to DevTools");
    let (socket, _response) =
        tungstenite::connect(ws_url).map_err(|e| SurfaceError::ConnectionFailed {
            url: ws_url.to_string(),
            reason: e.to_string(),
        })?;

    if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
        stream
            .set_read_timeout(Some(COMMAND_TIMEOUT))
            .map_err(|e| SurfaceError::ConnectionFailed {
                url: ws_url.to_string(),
                reason: e.to_string(),
            })?;
    }
    info!(url = ws_url, "DevTools connection established");
    Ok(socket)
}

/// Whether `err` leaves the socket unusable. A read timeout does not: the
/// late response is skipped by id on the next command.
pub fn connection_lost(err: &tungstenite::Error) -> bool {
    !matches!(
        err,
        tungstenite::Error::Io(e)
            if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
    )
}

pub struct CdpSurface {
    url: String,
    socket: Option<Socket>,
    next_id: u64,
    selectors: PageSelectors,
}

impl CdpSurface {
    pub fn connect(ws_url: &str, selectors: PageSelectors) -> Result<Self, SurfaceError> {
        let socket = dial(ws_url)?;
        Ok(Self {
            url: ws_url.to_string(),
            socket: Some(socket),
            next_id: 1,
            selectors,
        })
    }

    /// The live socket, redialing first if the last one was dropped.
    fn socket(&mut self) -> Result<&mut Socket, SurfaceError> {
        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => dial(&self.url)?,
        };
        Ok(self.socket.insert(socket))
    }

    fn transport_error(&mut self, err: tungstenite::Error, context: String) -> SurfaceError {
        if connection_lost(&err) {
            warn!(url = %self.url, %err, "DevTools connection lost, will redial");
            self.socket = None;
        }
        SurfaceError::Protocol {
            detail: format!("{context}: {err}"),
        }
    }

    fn send_command(&mut self, method: &str, params: Value) -> Result<Value, SurfaceError> {
        let id = self.next_id;
        self.next_id += 1;

        let payload = json!({ "id": id, "method": method, "params": params }).to_string();
        debug!(id, method, "sending DevTools command");
        let sent = self.socket()?.send(Message::Text(payload.into()));
        if let Err(e) = sent {
            return Err(self.transport_error(e, format!("failed to send {method}")));
        }

        loop {
            let read = self.socket()?.read();
            let message = match read {
                Ok(message) => message,
                Err(e) => {
                    return Err(self.transport_error(e, format!("waiting for {method} response")))
                }
            };
            match message {
                Message::Text(text) => {
                    if let Some(response) = match_response(&text, id)? {
                        return response;
                    }
                }
                Message::Close(_) => {
                    warn!(url = %self.url, "DevTools closed the connection, will redial");
                    self.socket = None;
                    return Err(SurfaceError::Protocol {
                        detail: "DevTools closed the connection".to_string(),
                    });
                }
                _ => {}
            }
        }
    }

    fn evaluate(&mut self, expression: &str) -> Result<Value, SurfaceError> {
        let result = self.send_command("Runtime.evaluate", build_evaluate_params(expression))?;
        parse_evaluate_result(&result)
    }

    fn evaluate_bool(&mut self, expression: &str) -> Result<bool, SurfaceError> {
        let value = self.evaluate(expression)?;
        value.as_bool().ok_or_else(|| SurfaceError::Protocol {
            detail: format!("expected a boolean, got {value}"),
        })
    }
}

impl GameSurface for CdpSurface {
    fn has_text_field(&mut self) -> Result<bool, SurfaceError> {
        let script = format!(
            "document.querySelector({}) !== null",
            js_string(&self.selectors.text_field)
        );
        self.evaluate_bool(&script)
    }

    fn set_field_value(&mut self, value: &str) -> Result<(), SurfaceError> {
        let script = set_value_script(&self.selectors.text_field, value);
        if self.evaluate_bool(&script)? {
            Ok(())
        } else {
            Err(SurfaceError::ElementNotFound {
                what: self.selectors.text_field.clone(),
            })
        }
    }

    fn field_focused(&mut self) -> Result<bool, SurfaceError> {
        let script = format!(
            "(() => {{ const input = document.querySelector({}); return input !== null && document.activeElement === input; }})()",
            js_string(&self.selectors.text_field)
        );
        self.evaluate_bool(&script)
    }

    fn focus_field(&mut self) -> Result<(), SurfaceError> {
        let script = format!(
            "(() => {{ const input = document.querySelector({}); if (!input) return false; input.focus(); return true; }})()",
            js_string(&self.selectors.text_field)
        );
        if self.evaluate_bool(&script)? {
            Ok(())
        } else {
            Err(SurfaceError::ElementNotFound {
                what: self.selectors.text_field.clone(),
            })
        }
    }

    fn press_tab(&mut self) -> Result<(), SurfaceError> {
        self.evaluate(TAB_SCRIPT).map(|_| ())
    }

    fn text_elements(&mut self) -> Result<Vec<TextElement>, SurfaceError> {
        let script = text_elements_script(&self.selectors.words);
        parse_text_elements(self.evaluate(&script)?)
    }

    fn action_controls(&mut self) -> Result<Option<usize>, SurfaceError> {
        let script = format!(
            "(() => {{ const c = document.querySelector({}); return c ? c.querySelectorAll({}).length : null; }})()",
            js_string(&self.selectors.controls_container),
            js_string(&self.selectors.controls)
        );
        match self.evaluate(&script)? {
            Value::Null => Ok(None),
            value => value
                .as_u64()
                .map(|n| Some(n as usize))
                .ok_or_else(|| SurfaceError::Protocol {
                    detail: format!("expected a control count, got {value}"),
                }),
        }
    }

    fn click_control(&mut self, index: usize) -> Result<bool, SurfaceError> {
        let script = click_script(&self.selectors, index);
        self.evaluate_bool(&script)
    }

    fn reload(&mut self) -> Result<(), SurfaceError> {
        self.send_command("Page.reload", json!({ "ignoreCache": false }))
            .map(|_| ())
    }
}

const TAB_SCRIPT: &str = "(() => {
  const el = document.activeElement || document.body;
  for (const type of ['keydown', 'keyup']) {
    el.dispatchEvent(new KeyboardEvent(type, { key: 'Tab', code: 'Tab', keyCode: 9, bubbles: true }));
  }
  return true;
})()";

/// Quote `s` as a JavaScript string literal.
pub fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Uses the prototype's native setter so framework-controlled inputs notice.
pub fn set_value_script(selector: &str, value: &str) -> String {
    format!(
        "(() => {{
  const input = document.querySelector({selector});
  if (!input) return false;
  const setter = Object.getOwnPropertyDescriptor(window.HTMLInputElement.prototype, 'value').set;
  setter.call(input, {value});
  input.dispatchEvent(new Event('input', {{ bubbles: true }}));
  return true;
}})()",
        selector = js_string(selector),
        value = js_string(value)
    )
}

pub fn text_elements_script(selector: &str) -> String {
    format!(
        "Array.from(document.querySelectorAll({})).map(el => ({{ text: el.innerText || '', color: window.getComputedStyle(el).color }}))",
        js_string(selector)
    )
}

pub fn click_script(selectors: &PageSelectors, index: usize) -> String {
    format!(
        "(() => {{
  const c = document.querySelector({container});
  const b = c ? c.querySelectorAll({controls})[{index}] : undefined;
  if (!b) return false;
  b.click();
  return true;
}})()",
        container = js_string(&selectors.controls_container),
        controls = js_string(&selectors.controls),
    )
}

pub fn build_evaluate_params(expression: &str) -> Value {
    json!({
        "expression": expression,
        "returnByValue": true,
    })
}

/// Pull the returned value out of a `Runtime.evaluate` result, turning thrown
/// exceptions into `SurfaceError::Script`.
pub fn parse_evaluate_result(result: &Value) -> Result<Value, SurfaceError> {
    if let Some(exception) = result.get("exceptionDetails") {
        let message = exception
            .get("exception")
            .and_then(|e| e.get("description"))
            .and_then(|d| d.as_str())
            .or_else(|| exception.get("text").and_then(|t| t.as_str()))
            .unwrap_or("unknown exception")
            .to_string();
        return Err(SurfaceError::Script { message });
    }
    Ok(result
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

/// `Ok(None)` for events and responses to other commands.
pub fn match_response(
    text: &str,
    id: u64,
) -> Result<Option<Result<Value, SurfaceError>>, SurfaceError> {
    let message: Value = serde_json::from_str(text).map_err(|e| SurfaceError::Protocol {
        detail: format!("malformed DevTools message: {e}"),
    })?;
    if message.get("id").and_then(Value::as_u64) != Some(id) {
        return Ok(None);
    }
    if let Some(error) = message.get("error") {
        let detail = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Ok(Some(Err(SurfaceError::Protocol {
            detail: detail.to_string(),
        })));
    }
    Ok(Some(Ok(message.get("result").cloned().unwrap_or(Value::Null))))
}

#[derive(Debug, Deserialize)]
struct RawElement {
    text: String,
    color: String,
}

pub fn parse_text_elements(value: Value) -> Result<Vec<TextElement>, SurfaceError> {
    let raw: Vec<RawElement> =
        serde_json::from_value(value).map_err(|e| SurfaceError::Protocol {
            detail: format!("unexpected element list: {e}"),
        })?;
    Ok(raw
        .into_iter()
        .map(|el| TextElement {
            text: el.text,
            color: el.color.parse().ok(),
        })
        .collect())
}
