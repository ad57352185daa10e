//! Remote read-only access to registry snapshots over TCP.
//!
//! The endpoint serves point-in-time snapshot data to out-of-process
//! viewers. Every request is answered from a fresh snapshot, so a viewer
//! polling the endpoint sees the registry advance; nothing a viewer does
//! can mutate the registry.
//!
//! The wire format is length-delimited only implicitly: each side writes
//! one bincode-encoded message at a time over a buffered stream and the
//! decoder consumes exactly one message per read. A handshake carrying
//! [`SERVICE_NAME`] rejects strangers that happen to dial the port.

use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registry::CounterRegistry;
use crate::snapshot::{CategoryData, CounterData};

/// Protocol identity exchanged during the handshake.
pub const SERVICE_NAME: &str = "telemetria.snapshot.v1";

/// Requests a viewer may issue after the handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Request {
    Hello { service: String },
    GetCounters,
    GetCounter { name: String },
    GetCounterById { id: String },
    GetCategory { name: String },
    GetCategories,
    GetStartTime,
    GetEndTime,
}

/// Replies produced by the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Response {
    Hello { service: String },
    Counters(Vec<CounterData>),
    Counter(Option<CounterData>),
    Category(Option<CategoryData>),
    Categories(Vec<CategoryData>),
    Time(SystemTime),
    Rejected { reason: String },
}

/// One bincode message per call over buffered reader/writer halves.
struct Transport<R, W>
where
    R: Read,
    W: Write,
{
    reader: Mutex<BufReader<R>>,
    writer: Mutex<BufWriter<W>>,
}

impl<R, W> Transport<R, W>
where
    R: Read,
    W: Write,
{
    fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(BufWriter::new(writer)),
        }
    }

    fn send<T: Serialize>(&self, value: &T) -> Result<()> {
        let mut writer = self.writer.lock();
        bincode::serialize_into(&mut *writer, value)?;
        writer.flush()?;
        Ok(())
    }

    fn recv<T: DeserializeOwned>(&self) -> Result<T> {
        let mut reader = self.reader.lock();
        Ok(bincode::deserialize_from(&mut *reader)?)
    }
}

fn stream_transport(stream: &TcpStream) -> Result<Transport<TcpStream, TcpStream>> {
    let reader = stream.try_clone()?;
    let writer = stream.try_clone()?;
    Ok(Transport::new(reader, writer))
}

struct Published {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Serves registry snapshots to remote viewers.
///
/// Created unpublished; [`publish`](Self::publish) binds the listener and
/// starts accepting. [`shutdown`](Self::shutdown) (also run on drop)
/// stops the accept loop and returns the endpoint to the unpublished
/// state, after which it may be published again.
pub struct RemoteEndpoint {
    registry: Arc<CounterRegistry>,
    published: Mutex<Option<Published>>,
}

impl RemoteEndpoint {
    pub fn new(registry: Arc<CounterRegistry>) -> Self {
        Self {
            registry,
            published: Mutex::new(None),
        }
    }

    /// Binds a loopback listener and starts accepting viewers. Port `0`
    /// asks the OS for a free port; [`port`](Self::port) reports the
    /// bound one.
    pub fn publish(&self, port: u16) -> Result<()> {
        let mut published = self.published.lock();
        if published.is_some() {
            return Err(Error::InvalidOperation(
                "endpoint is already published".into(),
            ));
        }
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        let local_addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let registry = Arc::clone(&self.registry);
        let loop_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("telemetria-remote".into())
            .spawn(move || accept_loop(listener, registry, loop_stop))
            .map_err(Error::Transport)?;
        tracing::info!(addr = %local_addr, "snapshot endpoint published");
        *published = Some(Published {
            local_addr,
            stop,
            handle,
        });
        Ok(())
    }

    /// The bound port, if published.
    pub fn port(&self) -> Option<u16> {
        self.published.lock().as_ref().map(|p| p.local_addr.port())
    }

    /// Address a viewer should dial, e.g. `127.0.0.1:9214`. Fails with
    /// [`Error::InvalidOperation`] before [`publish`](Self::publish).
    pub fn viewer_endpoint(&self) -> Result<String> {
        self.published
            .lock()
            .as_ref()
            .map(|p| p.local_addr.to_string())
            .ok_or_else(|| Error::InvalidOperation("endpoint is not published".into()))
    }

    /// Stops accepting and joins the accept thread. Idempotent.
    pub fn shutdown(&self) {
        let Some(published) = self.published.lock().take() else {
            return;
        };
        published.stop.store(true, Ordering::Relaxed);
        // Wake the blocking accept with a throwaway connection.
        let _ = TcpStream::connect(published.local_addr);
        if published.handle.join().is_err() {
            tracing::warn!("snapshot endpoint accept loop panicked");
        }
    }
}

impl Drop for RemoteEndpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: TcpListener, registry: Arc<CounterRegistry>, stop: Arc<AtomicBool>) {
    for incoming in listener.incoming() {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        match incoming {
            Ok(stream) => {
                let registry = Arc::clone(&registry);
                let spawned = thread::Builder::new()
                    .name("telemetria-remote-conn".into())
                    .spawn(move || {
                        if let Err(err) = serve_connection(stream, &registry) {
                            tracing::debug!(error = %err, "viewer connection ended");
                        }
                    });
                if let Err(err) = spawned {
                    tracing::warn!(error = %err, "failed to spawn viewer thread");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
            }
        }
    }
}

fn serve_connection(stream: TcpStream, registry: &CounterRegistry) -> Result<()> {
    let transport = stream_transport(&stream)?;
    match transport.recv::<Request>()? {
        Request::Hello { service } if service == SERVICE_NAME => {
            transport.send(&Response::Hello {
                service: SERVICE_NAME.to_string(),
            })?;
        }
        other => {
            transport.send(&Response::Rejected {
                reason: format!("expected hello for `{SERVICE_NAME}`, got {other:?}"),
            })?;
            return Ok(());
        }
    }
    loop {
        let request = match transport.recv::<Request>() {
            Ok(request) => request,
            // Viewer hung up.
            Err(_) => return Ok(()),
        };
        transport.send(&answer(registry, request))?;
    }
}

fn answer(registry: &CounterRegistry, request: Request) -> Response {
    let data = registry.snapshot().to_data();
    match request {
        Request::Hello { .. } => Response::Rejected {
            reason: "handshake already completed".into(),
        },
        Request::GetCounters => Response::Counters(data.counters),
        Request::GetCounter { name } => {
            Response::Counter(data.get_counter(&name).cloned())
        }
        Request::GetCounterById { id } => Response::Counter(
            data.counters
                .iter()
                .find(|c| c.id.as_deref() == Some(id.as_str()))
                .cloned(),
        ),
        Request::GetCategory { name } => {
            Response::Category(data.get_category(&name).cloned())
        }
        Request::GetCategories => Response::Categories(data.categories),
        Request::GetStartTime => Response::Time(data.start_time),
        Request::GetEndTime => Response::Time(data.end_time),
    }
}

/// Client side of the snapshot protocol.
///
/// Each accessor issues one request and decodes one reply; an unexpected
/// reply shape is a codec-level failure surfaced as
/// [`Error::InvalidOperation`].
pub struct RemoteRegistry {
    transport: Transport<TcpStream, TcpStream>,
}

impl RemoteRegistry {
    /// Dials the endpoint and performs the service handshake.
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        let transport = stream_transport(&stream)?;
        transport.send(&Request::Hello {
            service: SERVICE_NAME.to_string(),
        })?;
        match transport.recv::<Response>()? {
            Response::Hello { service } if service == SERVICE_NAME => {
                Ok(Self { transport })
            }
            Response::Rejected { reason } => Err(Error::InvalidOperation(reason)),
            other => Err(unexpected(&other)),
        }
    }

    pub fn get_counters(&self) -> Result<Vec<CounterData>> {
        match self.roundtrip(Request::GetCounters)? {
            Response::Counters(counters) => Ok(counters),
            other => Err(unexpected(&other)),
        }
    }

    pub fn get_counter(&self, name: &str) -> Result<Option<CounterData>> {
        match self.roundtrip(Request::GetCounter { name: name.into() })? {
            Response::Counter(counter) => Ok(counter),
            other => Err(unexpected(&other)),
        }
    }

    /// Looks a counter up by its registered id. Unlike the in-process
    /// registry this returns `None` rather than an error for an unknown
    /// id, since the id may simply have been superseded since the viewer
    /// last polled.
    pub fn get_counter_by_id(&self, id: &str) -> Result<Option<CounterData>> {
        match self.roundtrip(Request::GetCounterById { id: id.into() })? {
            Response::Counter(counter) => Ok(counter),
            other => Err(unexpected(&other)),
        }
    }

    pub fn get_category(&self, name: &str) -> Result<Option<CategoryData>> {
        match self.roundtrip(Request::GetCategory { name: name.into() })? {
            Response::Category(category) => Ok(category),
            other => Err(unexpected(&other)),
        }
    }

    pub fn get_categories(&self) -> Result<Vec<CategoryData>> {
        match self.roundtrip(Request::GetCategories)? {
            Response::Categories(categories) => Ok(categories),
            other => Err(unexpected(&other)),
        }
    }

    pub fn start_time(&self) -> Result<SystemTime> {
        match self.roundtrip(Request::GetStartTime)? {
            Response::Time(time) => Ok(time),
            other => Err(unexpected(&other)),
        }
    }

    /// Capture time of the snapshot answering this request.
    pub fn end_time(&self) -> Result<SystemTime> {
        match self.roundtrip(Request::GetEndTime)? {
            Response::Time(time) => Ok(time),
            other => Err(unexpected(&other)),
        }
    }

    fn roundtrip(&self, request: Request) -> Result<Response> {
        self.transport.send(&request)?;
        self.transport.recv()
    }
}

fn unexpected(response: &Response) -> Error {
    Error::InvalidOperation(format!("unexpected reply: {response:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn published_endpoint() -> (Arc<CounterRegistry>, RemoteEndpoint) {
        let registry = Arc::new(CounterRegistry::new());
        let endpoint = RemoteEndpoint::new(Arc::clone(&registry));
        endpoint.publish(0).unwrap();
        (registry, endpoint)
    }

    #[test]
    fn test_viewer_endpoint_requires_publish() {
        let endpoint = RemoteEndpoint::new(Arc::new(CounterRegistry::new()));
        assert!(matches!(
            endpoint.viewer_endpoint(),
            Err(Error::InvalidOperation(_))
        ));
        assert_eq!(endpoint.port(), None);
    }

    #[test]
    fn test_double_publish_rejected() {
        let (_registry, endpoint) = published_endpoint();
        assert!(matches!(
            endpoint.publish(0),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_remote_queries_see_registry_advance() {
        let (registry, endpoint) = published_endpoint();
        let counter = registry
            .counter("Compile")
            .category("Build")
            .register()
            .unwrap();
        counter.add(5);

        let client = RemoteRegistry::connect(&endpoint.viewer_endpoint().unwrap()).unwrap();
        let remote = client.get_counter("Compile").unwrap().unwrap();
        assert_eq!(remote.total_count, 5);
        assert_eq!(remote.category, "Build");

        counter.add(2);
        let remote = client.get_counter("Compile").unwrap().unwrap();
        assert_eq!(remote.total_count, 7);

        assert!(client.get_counter("Missing").unwrap().is_none());
        let categories = client.get_categories().unwrap();
        assert!(categories.iter().any(|c| c.name == "Build"));
        assert_eq!(client.start_time().unwrap(), registry.start_time());
        assert!(client.end_time().unwrap() >= registry.start_time());
    }

    #[test]
    fn test_lookup_by_id() {
        let (registry, endpoint) = published_endpoint();
        registry
            .counter("Requests")
            .id("net.requests")
            .register()
            .unwrap();

        let client = RemoteRegistry::connect(&endpoint.viewer_endpoint().unwrap()).unwrap();
        let remote = client.get_counter_by_id("net.requests").unwrap().unwrap();
        assert_eq!(remote.name, "Requests");
        assert!(client.get_counter_by_id("net.unknown").unwrap().is_none());
    }

    #[test]
    fn test_wrong_service_name_rejected() {
        let (_registry, endpoint) = published_endpoint();
        let addr = endpoint.viewer_endpoint().unwrap();

        let stream = TcpStream::connect(&addr).unwrap();
        let transport = stream_transport(&stream).unwrap();
        transport
            .send(&Request::Hello {
                service: "someone.else.v1".into(),
            })
            .unwrap();
        assert!(matches!(
            transport.recv::<Response>().unwrap(),
            Response::Rejected { .. }
        ));
    }

    #[test]
    fn test_shutdown_and_republish() {
        let (_registry, endpoint) = published_endpoint();
        endpoint.shutdown();
        assert_eq!(endpoint.port(), None);
        endpoint.publish(0).unwrap();
        assert!(endpoint.port().is_some());
    }
}
