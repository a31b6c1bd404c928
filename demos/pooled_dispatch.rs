/// Example: a line-oriented TCP service dispatching to pooled and request-scoped components
///
/// Each connection is one request. Lines look like `add 2 3` or `note hello`;
/// `add` runs on a pooled calculator, `note` appends to a request-scoped
/// journal that is torn down when the connection ends.

use ferrous_container::chain::{AccessLog, ConcurrencyLimit, Connection, HostFilter, ServiceChain};
use ferrous_container::{
    unpack, CallContext, ComponentCollection, Container, ContainerConfig, ContainerResult, Fault, LoggingHook,
    ServiceProperties,
};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// ===== Components =====

struct Calculator;

struct Journal {
    lines: Vec<String>,
}

fn components() -> ContainerResult<Container> {
    let mut props = ServiceProperties::new();
    props.set("MaxSize", "2").set("AccessTimeout", "500 milliseconds").set("DefaultPrincipal", "demo");
    let mut components = ComponentCollection::with_config(ContainerConfig::from_properties(&props)?);

    components
        .add_pooled("calculator", || Ok(Calculator))
        .method("add", |_c: &mut Calculator, args| {
            let (a, b): (i64, i64) = unpack(args)?;
            a.checked_add(b)
                .map(|sum| Box::new(sum) as ferrous_container::Payload)
                .ok_or_else(|| Fault::application("Overflow", format!("{} + {} overflows", a, b)))
        })
        .application_fault("Overflow");

    components
        .add_request_scoped("journal", || Ok(Journal { lines: Vec::new() }))
        .method("note", |j: &mut Journal, args| {
            j.lines.push(unpack::<String>(args)?);
            Ok(Box::new(j.lines.len()))
        })
        .on_destroy(|j: &mut Journal| println!("request ended with {} journal lines", j.lines.len()));

    components.add_hook(Arc::new(LoggingHook::new()));
    components.build()
}

// ===== Connection Handling =====

fn handle(container: &Container, conn: &mut dyn Connection) -> ContainerResult<()> {
    let request = container.begin_request();
    let ctx = CallContext::new().with_request(&request);

    let mut input = String::new();
    conn.read_to_string(&mut input)?;
    for line in input.lines() {
        let mut words = line.split_whitespace();
        let reply = match (words.next(), words.next(), words.next()) {
            (Some("add"), Some(a), Some(b)) => match (a.parse::<i64>(), b.parse::<i64>()) {
                (Ok(a), Ok(b)) => match container.call::<_, i64>("calculator", "add", (a, b), &ctx) {
                    Ok(sum) => sum.to_string(),
                    Err(err) => format!("error: {}", err),
                },
                _ => "error: add takes two integers".to_string(),
            },
            (Some("note"), Some(text), _) => {
                let count: usize = container.call("journal", "note", text.to_string(), &ctx)?;
                format!("noted ({})", count)
            }
            _ => format!("error: unknown command '{}'", line),
        };
        writeln!(conn, "{}", reply)?;
    }
    Ok(())
}

fn send(addr: std::net::SocketAddr, script: &str) -> std::io::Result<Vec<String>> {
    let mut stream = TcpStream::connect(addr)?;
    stream.write_all(script.as_bytes())?;
    stream.shutdown(std::net::Shutdown::Write)?;
    BufReader::new(stream).lines().collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let container = components()?;
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    let dispatcher = container.clone();
    let chain = ServiceChain::new("calculator", move |conn: &mut dyn Connection| handle(&dispatcher, conn))
        .link(AccessLog::new())
        .link(HostFilter::new())
        .link(ConcurrencyLimit::new(4));

    let mut props = ServiceProperties::new();
    props.set("OnlyFrom", "localhost");
    chain.init(&props)?;
    chain.start()?;

    let clients = thread::spawn(move || {
        let scripts = ["add 2 3\nadd 40 2\n", "note first\nnote second\nadd 9223372036854775807 1\n"];
        scripts.iter().map(|script| send(addr, script)).collect::<Vec<_>>()
    });

    for _ in 0..2 {
        let (mut stream, _) = listener.accept()?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        if let Err(err) = chain.service(&mut stream) {
            eprintln!("connection failed: {}", err);
        }
    }

    for replies in clients.join().map_err(|_| "client thread panicked")? {
        for reply in replies? {
            println!("< {}", reply);
        }
    }

    chain.stop()?;
    let stats = container.pool_stats("calculator")?;
    println!("calculator pool: created {}, checkouts {}", stats.created, stats.checkouts);
    container.shutdown(Duration::from_secs(1));
    Ok(())
}
