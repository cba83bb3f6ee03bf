use tether::args::{self, Mode};
use tether::flags::Flags;
use tether::{engine, net};

#[cfg(feature = "log")]
struct StderrLogger;

#[cfg(feature = "log")]
impl log::Log for StderrLogger {
  fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
    true
  }

  fn log(&self, record: &log::Record<'_>) {
    eprintln!("{}", record.args());
  }

  fn flush(&self) {}
}

#[cfg(feature = "log")]
fn init_logging(verbosity: u8) {
  static LOGGER: StderrLogger = StderrLogger;

  let level = match verbosity {
    0 => log::LevelFilter::Warn,
    1 => log::LevelFilter::Info,
    _ => log::LevelFilter::Trace,
  };
  if log::set_logger(&LOGGER).is_ok() {
    log::set_max_level(level);
  }
}

fn program_name() -> String {
  std::env::args()
    .next()
    .as_deref()
    .and_then(|path| path.rsplit('/').next().map(str::to_string))
    .unwrap_or_else(|| "tether".to_string())
}

fn run() -> i32 {
  let program = program_name();

  let parsed = match args::parse(std::env::args().skip(1)) {
    Ok(parsed) => parsed,
    Err(message) => {
      eprintln!("{program}: {message}");
      eprint!("{}", args::usage(&program));
      return 1;
    }
  };

  if parsed.help {
    print!("{}", args::usage(&program));
    return 0;
  }

  #[cfg(feature = "log")]
  init_logging(parsed.verbosity);

  let mut connection = parsed.connection;
  let setup = match parsed.mode {
    Mode::Connect => net::connect(&mut connection),
    Mode::Listen => net::listen(&mut connection),
  };

  let result = setup.and_then(|()| {
    if connection.flags.contains(Flags::VERY_VERBOSE_MODE) {
      connection.warn_details();
    }
    engine::run(&mut connection)
  });

  match result {
    Ok(()) => 0,
    Err(err) => {
      eprintln!("{program}: {err}");
      1
    }
  }
}

fn main() {
  std::process::exit(run());
}
