mod cache;
mod config;
mod manager;
mod media;
mod scanner;
mod session;
mod store;
mod system;
mod threads;
mod thumbnail;
mod trash;

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Result;
use tracing::{info, warn};

use config::{Config, Mode, USAGE};
use scanner::FileScanner;
use session::{Printer, Session};
use store::SessionStore;
use trash::{DesktopTrash, Trash, TrashDir};

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mediasort=info".parse().unwrap()),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = Config::from_env()?;

    match config.mode {
        Mode::Help => println!("{}", USAGE),
        Mode::Check => check(&config)?,
        Mode::Stats => stats(&config)?,
        Mode::Browse => browse(&config)?,
    }
    Ok(())
}

fn check(config: &Config) -> Result<()> {
    let issues = FileScanner::check_directories(&config.files)?;
    for issue in &issues {
        println!("{}", issue);
    }
    info!(issues = issues.len(), "Directory check done");
    Ok(())
}

fn stats(config: &Config) -> Result<()> {
    let result = config.scanner().files_from_args(&config.files)?;
    for (kind, count) in FileScanner::stats(&result.files) {
        println!("'{}': {} files", kind, count);
    }
    println!("total: {}", result.files.len());
    Ok(())
}

fn open_store(config: &Config) -> Result<SessionStore> {
    let path: PathBuf = match &config.db_path {
        Some(path) => path.clone(),
        None => SessionStore::default_db_path()?,
    };

    SessionStore::open(&path).or_else(|err| {
        warn!(error = %err, "Session store unusable, starting fresh");
        SessionStore::handle_corruption(&path)
    })
}

fn browse(config: &Config) -> Result<()> {
    let context = glib::MainContext::default();
    let store = open_store(config)?;

    let trash: Box<dyn Trash> = match &config.trash_dir {
        Some(dir) => Box::new(TrashDir::new(dir)),
        None => Box::new(DesktopTrash),
    };
    let printer: Printer = Rc::new(|line: &str| println!("{}", line));

    let session = Session::new(&context, config.scanner(), trash, store, printer)?;
    if let Some(base_dir) = &config.base_dir {
        session.borrow_mut().set_base_dir(base_dir)?;
    }
    session.borrow_mut().open(&config.files)?;

    let lines = session::stdin_lines()?;
    let main_loop = glib::MainLoop::new(Some(&context), false);
    let quit = main_loop.clone();
    context.spawn_local(async move {
        session::run(session, lines).await;
        quit.quit();
    });

    main_loop.run();
    Ok(())
}
