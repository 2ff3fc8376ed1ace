#![allow(dead_code)]

use std::{
    io::{BufRead, BufReader, Write},
    net::{TcpListener, TcpStream},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use relaymail::{transport::smtp::ClientConfigBuilder, ClientConfig, TlsMode};

/// What the server does after a command
pub enum Reply {
    Send(String),
    /// Writes the reply, then hangs up
    Close(String),
}

type Handler = dyn Fn(&str) -> Option<Reply> + Send + Sync;

/// A local SMTP server answering from a script
///
/// Every accepted connection is greeted right away, then each line the
/// client sends is recorded and answered: first by the handler, then by
/// [`standard_reply`] when the handler has nothing to say.
pub struct MockServer {
    port: u16,
    state: Arc<State>,
}

struct State {
    extensions: Vec<String>,
    greeting_delay: Duration,
    handler: Box<Handler>,
    connections: AtomicUsize,
    commands: Mutex<Vec<Vec<String>>>,
    messages: Mutex<Vec<String>>,
}

impl MockServer {
    /// A server announcing `extensions` and accepting everything
    pub fn start(extensions: &[&str]) -> MockServer {
        Self::start_with(extensions, Duration::ZERO, |_| None)
    }

    pub fn start_with(
        extensions: &[&str],
        greeting_delay: Duration,
        handler: impl Fn(&str) -> Option<Reply> + Send + Sync + 'static,
    ) -> MockServer {
        init_logging();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(State {
            extensions: extensions.iter().map(|e| (*e).to_owned()).collect(),
            greeting_delay,
            handler: Box::new(handler),
            connections: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
        });

        let accepting = Arc::clone(&state);
        thread::spawn(move || {
            for socket in listener.incoming() {
                let Ok(socket) = socket else { break };
                let index = {
                    let mut commands = accepting.commands.lock().unwrap();
                    commands.push(Vec::new());
                    commands.len() - 1
                };
                accepting.connections.fetch_add(1, Ordering::SeqCst);
                let state = Arc::clone(&accepting);
                thread::spawn(move || serve(&state, index, socket));
            }
        });

        MockServer { port, state }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Configuration pointing at this server, plaintext, with a sender
    pub fn config(&self) -> ClientConfigBuilder {
        ClientConfig::builder("127.0.0.1")
            .port(self.port)
            .tls_mode(TlsMode::None)
            .from("sender@relay.test")
            .hello_name(relaymail::transport::smtp::extension::ClientId::Domain(
                "client.test".to_owned(),
            ))
            .timeout(Some(Duration::from_secs(5)))
    }

    /// Number of accepted connections
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Lines received on the `index`th connection
    pub fn commands(&self, index: usize) -> Vec<String> {
        self.state.commands.lock().unwrap()[index].clone()
    }

    /// Message contents received through `DATA`, in order
    pub fn messages(&self) -> Vec<String> {
        self.state.messages.lock().unwrap().clone()
    }

    /// Waits until the `index`th connection received `line`
    ///
    /// Closing a replaced session happens after the new one is handed out,
    /// so its `QUIT` can land slightly later.
    pub fn wait_for(&self, index: usize, line: &str) -> bool {
        for _ in 0..100 {
            if self.commands(index).iter().any(|l| l == line) {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }
}

/// Shows the client's side of the dialogue with `--nocapture`
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Answers the commands every test relies on
pub fn standard_reply(line: &str, extensions: &[String]) -> String {
    let verb = line
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    match verb.as_str() {
        "EHLO" => {
            let mut reply = String::from("250-mock.test greets you\r\n");
            for (i, extension) in extensions.iter().enumerate() {
                let sep = if i + 1 == extensions.len() { ' ' } else { '-' };
                reply.push_str(&format!("250{sep}{extension}\r\n"));
            }
            if extensions.is_empty() {
                reply = "250 mock.test greets you\r\n".to_owned();
            }
            reply
        }
        "MAIL" | "RCPT" | "NOOP" => "250 2.0.0 OK\r\n".to_owned(),
        "DATA" => "354 End data with <CR><LF>.<CR><LF>\r\n".to_owned(),
        "QUIT" => "221 2.0.0 Bye\r\n".to_owned(),
        "*" => "501 5.7.0 Authentication cancelled\r\n".to_owned(),
        _ => "502 5.5.2 Command not recognized\r\n".to_owned(),
    }
}

fn serve(state: &State, index: usize, socket: TcpStream) {
    thread::sleep(state.greeting_delay);
    let Ok(mut writer) = socket.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(socket);
    if writer.write_all(b"220 mock.test ESMTP ready\r\n").is_err() {
        return;
    }

    let mut raw = Vec::new();
    loop {
        raw.clear();
        // a TLS probe sends binary data, never fail on it
        match reader.read_until(b'\n', &mut raw) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&raw).trim_end().to_owned();
        state.commands.lock().unwrap()[index].push(line.clone());

        let reply = match (state.handler)(&line) {
            Some(reply) => reply,
            None => Reply::Send(standard_reply(&line, &state.extensions)),
        };
        let (text, close) = match reply {
            Reply::Send(text) => (text, false),
            Reply::Close(text) => (text, true),
        };
        if writer.write_all(text.as_bytes()).is_err() || close {
            return;
        }

        if line.eq_ignore_ascii_case("DATA") && text.starts_with("354") {
            let Some(message) = read_data(&mut reader) else {
                return;
            };
            state.messages.lock().unwrap().push(message);
            let reply = match (state.handler)(".") {
                Some(Reply::Send(text)) | Some(Reply::Close(text)) => text,
                None => "250 2.0.0 Ok: queued as MOCK1\r\n".to_owned(),
            };
            if writer.write_all(reply.as_bytes()).is_err() {
                return;
            }
        }
        if line.eq_ignore_ascii_case("QUIT") {
            return;
        }
    }
}

/// Reads the message up to the lone dot, undoing dot stuffing
fn read_data(reader: &mut BufReader<TcpStream>) -> Option<String> {
    let mut message = String::new();
    let mut raw = Vec::new();
    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw).ok()? == 0 {
            return None;
        }
        let line = String::from_utf8_lossy(&raw);
        if line == ".\r\n" {
            return Some(message);
        }
        message.push_str(line.strip_prefix('.').unwrap_or(&line));
    }
}
