use {
    clap::{Parser, ValueEnum},
    log::{LevelFilter, debug, error, info, warn},
    nix::unistd::{Group, User, chdir, chroot, geteuid, getuid, setgid, setuid},
    pclink::{
        io_err,
        name::NameConversion,
        partition::PartitionEvent,
        res, *,
    },
    std::{fs::File, path::PathBuf, time::Duration},
    tokio::{
        signal::unix::{SignalKind, signal},
        sync::mpsc::{UnboundedReceiver, unbounded_channel},
        time::sleep,
    },
    tokio_stream::{StreamExt, wrappers::UnboundedReceiverStream},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// TCP connection to an emulator
    #[value(alias = "tcp")]
    Vice,
    /// UDP packets from an ETH64 cartridge
    #[value(alias = "udp")]
    Eth,
    /// RS-232 cable
    Rs232,
}

#[derive(Parser, Debug)]
#[command(version, about = "IDEDOS 0.9x PCLink fileserver")]
struct Cli {
    /// Link to the client
    #[arg(short, long, value_enum, default_value_t = Mode::Vice)]
    mode: Mode,

    /// Serial port device
    #[arg(short, long)]
    device: Option<String>,

    /// IP address of the emulator or the C64 on the network
    #[arg(short = 'i', long, visible_alias = "ipaddress")]
    address: Option<String>,

    /// Network number
    #[arg(short = 'N', long, default_value_t = 0)]
    network: u16,

    /// Use 38400 baud instead of 115200 on the serial line
    #[arg(long)]
    baud_low: bool,

    /// Directory to serve
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Create dot file types
    #[arg(short = 'F', long, group = "conversion")]
    dot_type: bool,

    /// Create comma file types
    #[arg(short = 'C', long, group = "conversion")]
    comma_type: bool,

    /// Almost everything to PRG
    #[arg(short = 'P', long, group = "conversion")]
    allprg: bool,

    /// User under we run
    #[arg(short, long)]
    user: Option<String>,

    /// Group under we run
    #[arg(short, long)]
    group: Option<String>,

    /// Log file
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Debug logging
    #[arg(short = 'D', long)]
    debug: bool,
}

impl Cli {
    fn conversion(&self) -> NameConversion {
        match (self.comma_type, self.allprg) {
            (true, _) => NameConversion::ForceComma,
            (_, true) => NameConversion::IgnoreDot,
            _ => NameConversion::ForceDot,
        }
    }
}

fn init_logger(cli: &Cli) -> std::io::Result<()> {
    let level = match (cli.debug, cli.verbose) {
        (true, _) => LevelFilter::Debug,
        (_, true) => LevelFilter::Info,
        _ => LevelFilter::Warn,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).parse_default_env();
    if let Some(path) = &cli.log {
        let file = File::options().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

/// Keep trying to bring the link up, once per second.
async fn initialize<T: Transport>(transport: &mut T) {
    let mut last = None;
    loop {
        match transport.initialize().await {
            Ok(()) => return,
            Err(e) => {
                if last != Some(e.errno()) {
                    error!("{} driver: {}", transport.name(), e);
                    last = Some(e.errno());
                }
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Enter the served root and give up root privileges.
///
/// A failing chroot is only fatal when we had the privileges to do it.
fn drop_privileges(cli: &Cli) -> pclink::Result<()> {
    let privileged = getuid().is_root() || getuid() != geteuid();
    let user = cli.user.as_deref().or(privileged.then_some("nobody"));
    let group = cli.group.as_deref().or(privileged.then_some("nogroup"));

    let user = match user {
        Some(name) => match User::from_name(name)? {
            Some(user) => Some(user),
            None => return res!(io_err!(NotFound, format!("User \"{}\" does not exist", name))),
        },
        None => None,
    };
    let group = match group {
        Some(name) => match Group::from_name(name)? {
            Some(group) => Some(group),
            None => return res!(io_err!(NotFound, format!("Group \"{}\" does not exist", name))),
        },
        None => None,
    };

    if let Some(root) = &cli.root {
        chdir(root)?;
        if let Err(e) = chroot(root).and_then(|()| chdir("/")) {
            if privileged {
                return res!(e);
            }
            warn!("Chrooting failed: {}", e);
        }
    }

    if let Some(group) = group {
        setgid(group.gid)?;
    }
    if let Some(user) = user {
        setuid(user.uid)?;
    }
    Ok(())
}

async fn observe(events: UnboundedReceiver<PartitionEvent>) {
    let mut events = UnboundedReceiverStream::new(events);
    while let Some(event) = events.next().await {
        match event {
            PartitionEvent::PathChanged { id, path } => debug!("Partition {}: {:?}", id, path),
            PartitionEvent::Selected { id } => debug!("Partition {} selected", id),
        }
    }
}

/// Serve one client after another; a link that stops answering is brought up again.
async fn serve_forever<T: Transport>(session: &mut Session<T>, cli: &Cli) -> pclink::Result<()> {
    let mut first = true;
    loop {
        initialize(session.transport_mut()).await;
        if first {
            drop_privileges(cli)?;
            first = false;
        }

        if let Err(e) = session.serve().await {
            info!("{} driver: {}", session.transport().name(), e);
        }
        session.transport_mut().shutdown().await;
    }
}

async fn run<T: Transport>(transport: T, cli: &Cli) -> pclink::Result<i32> {
    let config = Config {
        root: PathBuf::from("."),
        conversion: cli.conversion(),
    };
    let mut session = Session::new(transport, config);

    let (observer, events) = unbounded_channel();
    session.partitions_mut().set_observer(observer);
    tokio::spawn(observe(events));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let result = tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully");
            Ok(())
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully");
            Ok(())
        }
        result = serve_forever(&mut session, cli) => result,
    };

    session.transport_mut().shutdown().await;
    info!("Server shutdown complete");
    result.map(|()| 0)
}

async fn pclinkd_main(cli: Cli) -> pclink::Result<i32> {
    init_logger(&cli)?;

    match cli.mode {
        Mode::Vice => run(TcpTransport::new(cli.address.as_deref(), None), &cli).await,
        Mode::Eth => run(UdpTransport::new(cli.address.as_deref(), cli.network), &cli).await,
        Mode::Rs232 => run(SerialTransport::new(cli.device.as_deref(), cli.baud_low), &cli).await,
    }
}

#[tokio::main]
async fn main() {
    let exit_code = pclinkd_main(Cli::parse()).await.unwrap_or_else(|e| {
        eprintln!("Error: {:?}", e);
        -1
    });

    std::process::exit(exit_code);
}
