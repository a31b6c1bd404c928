use ferrous_container::chain::{AccessLog, ChainState, ConcurrencyLimit, Connection, HostFilter, Next, ServerService, ServiceChain};
use ferrous_container::{ContainerError, ContainerResult, ServiceProperties};
use std::io::{self, Cursor, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

// ===== Fixtures =====

struct Pipe {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
    peer: Option<SocketAddr>,
}

impl Pipe {
    fn new(input: &str, peer: Option<&str>) -> Self {
        Self {
            input: Cursor::new(input.as_bytes().to_vec()),
            output: Vec::new(),
            peer: peer.map(|p| p.parse().unwrap()),
        }
    }
}

impl Read for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Connection for Pipe {
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

type Journal = Arc<Mutex<Vec<String>>>;

struct Step {
    name: &'static str,
    journal: Journal,
    fail_init: bool,
    fail_start: bool,
    fail_stop: bool,
}

impl Step {
    fn new(name: &'static str, journal: &Journal) -> Self {
        Self { name, journal: journal.clone(), fail_init: false, fail_start: false, fail_stop: false }
    }

    fn note(&self, event: &str) {
        self.journal.lock().unwrap().push(format!("{}:{}", self.name, event));
    }
}

impl ServerService for Step {
    fn name(&self) -> &str {
        self.name
    }

    fn init(&self, props: &ServiceProperties) -> ContainerResult<()> {
        self.note(&format!("init({})", props.get("Greeting").unwrap_or("-")));
        if self.fail_init {
            return Err(ContainerError::InvalidConfig(format!("{} cannot init", self.name)));
        }
        Ok(())
    }

    fn start(&self) -> ContainerResult<()> {
        self.note("start");
        if self.fail_start {
            return Err(ContainerError::IllegalState(format!("{} cannot start", self.name)));
        }
        Ok(())
    }

    fn stop(&self) -> ContainerResult<()> {
        self.note("stop");
        if self.fail_stop {
            return Err(ContainerError::IllegalState(format!("{} cannot stop", self.name)));
        }
        Ok(())
    }

    fn service(&self, conn: &mut dyn Connection, next: Next<'_>) -> ContainerResult<()> {
        self.note("service");
        next.run(conn)
    }
}

fn echo(conn: &mut dyn Connection) -> ContainerResult<()> {
    let mut line = String::new();
    conn.read_to_string(&mut line)?;
    conn.write_all(line.to_uppercase().as_bytes())?;
    Ok(())
}

fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn drain(journal: &Journal) -> Vec<String> {
    std::mem::take(&mut *journal.lock().unwrap())
}

// ===== Lifecycle =====

#[test]
fn lifecycle_runs_in_chain_order() {
    let log = journal();
    let chain = ServiceChain::new("echo", echo)
        .link(Step::new("outer", &log))
        .link(Step::new("inner", &log));
    assert_eq!(chain.link_names(), vec!["outer", "inner"]);

    let mut props = ServiceProperties::new();
    props.set("Greeting", "hi");
    chain.init(&props).unwrap();
    chain.start().unwrap();
    assert_eq!(chain.state(), ChainState::Started);

    let mut conn = Pipe::new("ping", None);
    chain.service(&mut conn).unwrap();
    assert_eq!(conn.output, b"PING");

    chain.stop().unwrap();
    assert_eq!(chain.state(), ChainState::Stopped);
    assert_eq!(
        drain(&log),
        vec![
            "outer:init(hi)",
            "inner:init(hi)",
            "outer:start",
            "inner:start",
            "outer:service",
            "inner:service",
            "inner:stop",
            "outer:stop",
        ]
    );
}

#[test]
fn init_twice_is_illegal() {
    let chain = ServiceChain::new("t", echo);
    chain.init(&ServiceProperties::new()).unwrap();
    let err = chain.init(&ServiceProperties::new()).unwrap_err();
    assert!(matches!(err, ContainerError::IllegalState(_)));
}

#[test]
fn failed_init_leaves_chain_created() {
    let log = journal();
    let mut broken = Step::new("broken", &log);
    broken.fail_init = true;
    let chain = ServiceChain::new("t", echo).link(broken);

    assert!(chain.init(&ServiceProperties::new()).is_err());
    assert_eq!(chain.state(), ChainState::Created);
    assert!(matches!(chain.start(), Err(ContainerError::IllegalState(_))));
}

#[test]
fn failed_start_stops_started_links_in_reverse() {
    let log = journal();
    let mut third = Step::new("third", &log);
    third.fail_start = true;
    let chain = ServiceChain::new("t", echo)
        .link(Step::new("first", &log))
        .link(Step::new("second", &log))
        .link(third);
    chain.init(&ServiceProperties::new()).unwrap();
    drain(&log);

    assert!(chain.start().is_err());
    assert_eq!(chain.state(), ChainState::Initialized);
    assert_eq!(
        drain(&log),
        vec!["first:start", "second:start", "third:start", "second:stop", "first:stop"]
    );
}

#[test]
fn stop_attempts_every_link_and_reports_the_first_error() {
    let log = journal();
    let mut flaky = Step::new("flaky", &log);
    flaky.fail_stop = true;
    let chain = ServiceChain::new("t", echo)
        .link(Step::new("outer", &log))
        .link(flaky)
        .link(Step::new("inner", &log));
    chain.init(&ServiceProperties::new()).unwrap();
    chain.start().unwrap();
    drain(&log);

    let err = chain.stop().unwrap_err();
    assert!(err.to_string().contains("flaky cannot stop"));
    assert_eq!(drain(&log), vec!["inner:stop", "flaky:stop", "outer:stop"]);
    assert_eq!(chain.state(), ChainState::Stopped);

    assert!(chain.stop().is_ok());
}

#[test]
fn stopped_chain_can_restart() {
    let log = journal();
    let chain = ServiceChain::new("t", echo).link(Step::new("only", &log));
    chain.init(&ServiceProperties::new()).unwrap();
    chain.start().unwrap();
    chain.stop().unwrap();
    assert!(chain.service(&mut Pipe::new("x", None)).is_err());

    chain.start().unwrap();
    let mut conn = Pipe::new("again", None);
    chain.service(&mut conn).unwrap();
    assert_eq!(conn.output, b"AGAIN");
}

// ===== Built-in Links =====

#[test]
fn built_in_links_configure_from_properties() {
    let limit = ConcurrencyLimit::new(64);
    let mut props = ServiceProperties::new();
    props.set("MaxConnections", "3").set("OnlyFrom", "localhost");
    limit.init(&props).unwrap();
    assert_eq!(limit.limit(), 3);

    let chain = ServiceChain::new("t", echo)
        .link(AccessLog::new())
        .link(HostFilter::new())
        .link(ConcurrencyLimit::new(2));
    chain.init(&props).unwrap();
    chain.start().unwrap();

    let mut local = Pipe::new("ok", Some("127.0.0.1:9000"));
    chain.service(&mut local).unwrap();
    assert_eq!(local.output, b"OK");

    let mut remote = Pipe::new("no", Some("203.0.113.9:9000"));
    let err = chain.service(&mut remote).unwrap_err();
    assert!(matches!(err, ContainerError::ServiceRejected { .. }));
    assert!(remote.output.is_empty());

    let mut unknown = Pipe::new("no", None);
    assert!(chain.service(&mut unknown).is_err());
}

#[test]
fn zero_connection_limit_is_invalid() {
    let limit = ConcurrencyLimit::new(1);
    let mut props = ServiceProperties::new();
    props.set("MaxConnections", "0");
    assert!(matches!(limit.init(&props), Err(ContainerError::InvalidConfig(_))));
}

#[test]
fn serves_tcp_connections() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let chain = ServiceChain::new("tcp", |conn: &mut dyn Connection| -> ContainerResult<()> {
        let mut buf = [0u8; 5];
        conn.read_exact(&mut buf)?;
        conn.write_all(&buf.to_ascii_uppercase())?;
        Ok(())
    })
    .link(HostFilter::new().allow(addr.ip()))
    .link(AccessLog::new());
    chain.init(&ServiceProperties::new()).unwrap();
    chain.start().unwrap();

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"hello").unwrap();
        let mut reply = [0u8; 5];
        stream.read_exact(&mut reply).unwrap();
        reply
    });

    let (mut stream, _) = listener.accept().unwrap();
    chain.service(&mut stream).unwrap();
    assert_eq!(&client.join().unwrap(), b"HELLO");
}
