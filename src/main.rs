use clap::Parser;
use std::io::Read;
use tracing_subscriber::EnvFilter;

use fauxfile::{FileSystem, InMemoryFs, MemFsOptions, NativeFs, Session, SessionOptions};

#[derive(Parser)]
#[command(name = "fauxfile")]
#[command(about = "Run filesystem scripts against an in-memory or native filesystem")]
#[command(version)]
struct Cli {
    /// Execute the script from command line argument
    #[arg(short = 'c')]
    script: Option<String>,

    /// Stop at the first failing command
    #[arg(short = 'e', long = "errexit")]
    errexit: bool,

    /// Run against the host filesystem instead of an in-memory tree
    #[arg(long = "native")]
    native: bool,

    /// Initial working directory
    #[arg(long = "cwd")]
    cwd: Option<String>,

    /// Output results as JSON (stdout, stderr, exitCode)
    #[arg(long = "json")]
    json: bool,

    /// Script file to execute
    #[arg()]
    script_file: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Determine script source: -c, file, or stdin
    let script = if let Some(s) = cli.script {
        s
    } else if let Some(ref file) = cli.script_file {
        match std::fs::read_to_string(file) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("Error: Cannot read script file: {}: {}", file, e);
                std::process::exit(1);
            }
        }
    } else {
        use std::io::IsTerminal;
        if std::io::stdin().is_terminal() {
            eprintln!("Error: No script provided. Use -c 'script', provide a script file, or pipe via stdin.");
            std::process::exit(1);
        }
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).unwrap_or_default();
        buf
    };

    let fs: Box<dyn FileSystem> = if cli.native {
        let fs = NativeFs::new();
        if let Some(cwd) = &cli.cwd {
            if let Err(e) = fs.chdir(cwd) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Box::new(fs)
    } else {
        match InMemoryFs::with_options(MemFsOptions {
            cwd: cli.cwd.clone(),
            ..Default::default()
        }) {
            Ok(fs) => Box::new(fs),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    };

    let mut session = Session::new(fs, SessionOptions { errexit: cli.errexit });
    let result = session.exec(&script);

    if cli.json {
        match serde_json::to_string(&result) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        if !result.stdout.is_empty() {
            print!("{}", result.stdout);
        }
        if !result.stderr.is_empty() {
            eprint!("{}", result.stderr);
        }
    }

    std::process::exit(result.exit_code);
}
