//! A small RESP2 server speaking enough PUBLISH/SUBSCRIBE for the Redis
//! bus, with hooks to push raw bursts and to drop every connection.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

type Outbox = mpsc::UnboundedSender<Vec<u8>>;

struct State {
    accepted: AtomicUsize,
    subscribe_commands: AtomicUsize,
    subscribers: Mutex<HashMap<usize, (HashSet<String>, Outbox)>>,
    published: Mutex<Vec<(String, String)>>,
    kill: watch::Sender<u64>,
}

pub struct FakeRedis {
    addr: SocketAddr,
    state: Arc<State>,
}

impl FakeRedis {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (kill, _) = watch::channel(0);
        let state = Arc::new(State {
            accepted: AtomicUsize::new(0),
            subscribe_commands: AtomicUsize::new(0),
            subscribers: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
            kill,
        });

        let accepting = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let id = accepting.accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, id, Arc::clone(&accepting)));
            }
        });

        Self { addr, state }
    }

    pub fn client(&self) -> redis::Client {
        redis::Client::open(format!("redis://{}", self.addr)).unwrap()
    }

    pub fn connections_accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    pub fn subscribe_commands(&self) -> usize {
        self.state.subscribe_commands.load(Ordering::SeqCst)
    }

    /// Live connections subscribed to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .subscribers
            .lock()
            .unwrap()
            .values()
            .filter(|(channels, _)| channels.contains(channel))
            .count()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.state.published.lock().unwrap().clone()
    }

    /// Writes every payload to each subscriber of `channel` in a single
    /// socket write. Returns how many connections got the burst.
    pub fn push_burst(&self, channel: &str, payloads: &[String]) -> usize {
        let burst: Vec<u8> = payloads
            .iter()
            .flat_map(|payload| message_frame(channel, payload))
            .collect();
        self.state.deliver(channel, &burst)
    }

    /// Closes every open connection, as a restarting server would.
    pub fn drop_connections(&self) {
        self.state.kill.send_modify(|generation| *generation += 1);
    }
}

impl State {
    fn deliver(&self, channel: &str, bytes: &[u8]) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .values()
            .filter(|(channels, _)| channels.contains(channel))
            .filter(|(_, outbox)| outbox.send(bytes.to_vec()).is_ok())
            .count()
    }

    fn execute(&self, id: usize, command: &[String], outbox: &Outbox) -> Vec<u8> {
        let name = command.first().map(|c| c.to_ascii_uppercase()).unwrap_or_default();
        let args = command.get(1..).unwrap_or_default();
        match name.as_str() {
            "SUBSCRIBE" => {
                self.subscribe_commands.fetch_add(1, Ordering::SeqCst);
                let mut subscribers = self.subscribers.lock().unwrap();
                let (channels, _) = subscribers
                    .entry(id)
                    .or_insert_with(|| (HashSet::new(), outbox.clone()));
                let mut reply = Vec::new();
                for channel in args {
                    channels.insert(channel.clone());
                    reply.extend(ack_frame("subscribe", channel, channels.len()));
                }
                reply
            }
            "UNSUBSCRIBE" => {
                let mut subscribers = self.subscribers.lock().unwrap();
                let mut reply = Vec::new();
                for channel in args {
                    let remaining = match subscribers.get_mut(&id) {
                        Some((channels, _)) => {
                            channels.remove(channel);
                            channels.len()
                        }
                        None => 0,
                    };
                    reply.extend(ack_frame("unsubscribe", channel, remaining));
                }
                reply
            }
            "PUBLISH" if args.len() == 2 => {
                self.published
                    .lock()
                    .unwrap()
                    .push((args[0].clone(), args[1].clone()));
                let receivers = self.deliver(&args[0], &message_frame(&args[0], &args[1]));
                format!(":{}\r\n", receivers).into_bytes()
            }
            "PING" => b"+PONG\r\n".to_vec(),
            _ => b"+OK\r\n".to_vec(),
        }
    }
}

async fn serve(mut socket: TcpStream, id: usize, state: Arc<State>) {
    let mut kill = state.kill.subscribe();
    let _ = kill.borrow_and_update();
    let (outbox, mut pushes) = mpsc::unbounded_channel::<Vec<u8>>();
    let mut pending = Vec::new();
    let mut chunk = [0u8; 4096];

    'conn: loop {
        tokio::select! {
            read = socket.read(&mut chunk) => {
                let n = match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                pending.extend_from_slice(&chunk[..n]);
                while let Some((command, used)) = parse_command(&pending) {
                    pending.drain(..used);
                    let reply = state.execute(id, &command, &outbox);
                    if socket.write_all(&reply).await.is_err() {
                        break 'conn;
                    }
                }
            }
            Some(bytes) = pushes.recv() => {
                if socket.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            _ = kill.changed() => break,
        }
    }

    state.subscribers.lock().unwrap().remove(&id);
}

fn bulk(value: &str) -> Vec<u8> {
    format!("${}\r\n{}\r\n", value.len(), value).into_bytes()
}

fn message_frame(channel: &str, payload: &str) -> Vec<u8> {
    let mut frame = b"*3\r\n".to_vec();
    frame.extend(bulk("message"));
    frame.extend(bulk(channel));
    frame.extend(bulk(payload));
    frame
}

fn ack_frame(kind: &str, channel: &str, count: usize) -> Vec<u8> {
    let mut frame = b"*3\r\n".to_vec();
    frame.extend(bulk(kind));
    frame.extend(bulk(channel));
    frame.extend(format!(":{}\r\n", count).into_bytes());
    frame
}

/// One complete `*N` array of bulk strings, and the bytes it used.
fn parse_command(buf: &[u8]) -> Option<(Vec<String>, usize)> {
    let (count, mut pos) = read_header(buf, 0, b'*')?;
    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        let (len, start) = read_header(buf, pos, b'$')?;
        let end = start + len;
        if buf.len() < end + 2 {
            return None;
        }
        parts.push(String::from_utf8_lossy(&buf[start..end]).into_owned());
        pos = end + 2;
    }
    Some((parts, pos))
}

fn read_header(buf: &[u8], pos: usize, marker: u8) -> Option<(usize, usize)> {
    if *buf.get(pos)? != marker {
        return None;
    }
    let rest = &buf[pos + 1..];
    let eol = rest.windows(2).position(|w| w == b"\r\n")?;
    let value = std::str::from_utf8(&rest[..eol]).ok()?.parse().ok()?;
    Some((value, pos + 1 + eol + 2))
}
