//! Line-driven browsing session.
//!
//! A `Session` owns the file manager and everything around it: the undo
//! stack, move targets, the base directory and the persisted store. Each
//! input line is one command; output goes through a `Printer` so the same
//! session can print to stdout or be inspected in tests.
//!
//! The session lives on the glib main context. Preview warmup runs on a
//! `Worker` and archive extraction reports progress through an `Updater`;
//! both call back into the main context.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use anyhow::{anyhow, bail, Context, Result};
use image::GenericImageView;
use tracing::{debug, info, trace, warn};

use crate::manager::{Action, FileManager, ListObserver, Severity, SortOrder};
use crate::media::archive::{ExtractProgress, Extraction};
use crate::media::{preview, MediaKind};
use crate::scanner::FileScanner;
use crate::store::{SessionStore, MAX_SLOT};
use crate::system;
use crate::threads::{Updater, Worker};
use crate::thumbnail::{DirectoryThumbnail, ThumbnailGenerator, DEFAULT_THUMB_HEIGHT};
use crate::trash::Trash;

pub const HELP: &str = "\
Commands:
  next [n], prev [n]        Go forward or back (wraps around)
  first, last               Go to the first or last file
  goto PATH                 Select a file of the list
  info                      Show details about the current file
  sort name|date [rev]      Sort the list
  reverse                   Reverse the sort order
  rename NAME               Rename the current file (never overwrites)
  move DIR                  Move the current file to DIR
  reuse                     Move the current file to the last target
  target SLOT [DIR]         Bind slot 0-9 to DIR, or move to the slot's DIR
  targets                   List the bound slots
  base DIR                  Resolve relative targets against DIR
  delete                    Send the current file to the trash
  star                      Star or unstar the current file
  undo                      Undo the last action
  rotate left|right         Rotate the current file
  flip h|v                  Flip the current file
  export PATH [W H]         Save the current rendering
  thumb PATH OUT            Save a thumbnail of a file or directory
  open PATH...              Browse other files
  extract                   Unpack the current zip archive and browse it
  stats                     Count files per kind
  help                      Show this help
  quit                      Leave";

/// Destination of the session's output lines.
pub type Printer = Rc<dyn Fn(&str)>;

/// Whether to keep reading commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListEvent {
    Modified,
    Empty,
}

/// Records list notifications until the session handles them.
struct EventLog(Rc<RefCell<Vec<ListEvent>>>);

impl ListObserver for EventLog {
    fn on_list_modified(&self) {
        self.0.borrow_mut().push(ListEvent::Modified);
    }

    fn on_list_empty(&self) {
        self.0.borrow_mut().push(ListEvent::Empty);
    }
}

pub struct Session {
    this: Weak<RefCell<Session>>,
    context: glib::MainContext,
    manager: FileManager,
    scanner: FileScanner,
    store: SessionStore,
    worker: Worker,
    printer: Printer,
    events: Rc<RefCell<Vec<ListEvent>>>,
    undo_stack: Vec<Action>,
    last_action: Option<(Severity, String)>,
    /// Move targets, most recent first.
    last_targets: Vec<PathBuf>,
    base_dir: Option<PathBuf>,
    extracting: bool,
}

impl Session {
    /// Create a session on `context`; continuations of background work run
    /// there.
    pub fn new(
        context: &glib::MainContext,
        scanner: FileScanner,
        trash: Box<dyn Trash>,
        store: SessionStore,
        printer: Printer,
    ) -> Result<Rc<RefCell<Self>>> {
        let worker = Worker::new(context)?;
        let base_dir = store.base_dir()?;
        let last_targets = store.recent_targets()?;

        let events = Rc::new(RefCell::new(Vec::new()));
        let mut manager = FileManager::new(trash);
        manager.set_observer(Box::new(EventLog(events.clone())));

        Ok(Rc::new_cyclic(|this| {
            RefCell::new(Self {
                this: this.clone(),
                context: context.clone(),
                manager,
                scanner,
                store,
                worker,
                printer,
                events,
                undo_stack: Vec::new(),
                last_action: None,
                last_targets,
                base_dir,
                extracting: false,
            })
        }))
    }

    pub fn manager(&self) -> &FileManager {
        &self.manager
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    pub fn set_base_dir(&mut self, dir: &Path) -> Result<()> {
        self.store.set_base_dir(dir)?;
        self.base_dir = Some(dir.to_path_buf());
        info!(?dir, "Base directory set");
        Ok(())
    }

    /// Browse the files resolved from `args`.
    pub fn open(&mut self, args: &[PathBuf]) -> Result<()> {
        let result = self.scanner.files_from_args(args)?;
        self.manager
            .set_files(result.files, result.start_file.as_deref());
        self.flush_events();
        Ok(())
    }

    fn print(&self, line: &str) {
        (self.printer)(line);
    }

    /// Run one command line, printing errors instead of returning them.
    pub fn handle_line(&mut self, line: &str) -> Flow {
        let flow = match self.execute(line) {
            Ok(flow) => flow,
            Err(err) => {
                debug!(command = line, error = %err, "Command failed");
                self.print(&format!("Error: {:#}", err));
                Flow::Continue
            }
        };
        self.flush_events();
        flow
    }

    fn execute(&mut self, line: &str) -> Result<Flow> {
        let line = line.trim();
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };
        trace!(command, args = rest, "Executing");

        match command {
            "" => {}
            "quit" | "exit" | "q" => return Ok(Flow::Quit),
            "help" | "?" => self.print(HELP),
            "next" | "n" => self.manager.go_forward(parse_count(rest)?),
            "prev" | "p" => self.manager.go_backward(parse_count(rest)?),
            "first" => self.manager.go_first(),
            "last" => self.manager.go_last(),
            "goto" => self.manager.go_file(Path::new(required(rest, "goto PATH")?))?,
            "info" => self.info()?,
            "sort" => self.sort(rest)?,
            "reverse" => {
                let order = self.manager.sort_order();
                self.manager.sort(SortOrder {
                    reverse: !order.reverse,
                    ..order
                });
            }
            "rename" => self.rename(required(rest, "rename NAME")?)?,
            "move" => {
                let dir = self.resolve_target(Path::new(required(rest, "move DIR")?));
                self.move_to(&dir)?;
            }
            "reuse" => match self.last_targets.first().cloned() {
                Some(dir) => self.move_to(&dir)?,
                None => self.print("There isn't a selected target yet"),
            },
            "target" => self.target(rest)?,
            "targets" => self.list_targets()?,
            "base" => {
                let dir = PathBuf::from(required(rest, "base DIR")?);
                self.set_base_dir(&dir)?;
                self.print(&format!("Base directory: '{}'", dir.display()));
            }
            "delete" => {
                let action = self.manager.delete_current()?;
                self.record(action);
            }
            "star" => {
                let action = self.manager.toggle_star()?;
                self.record(action);
            }
            "undo" => self.undo()?,
            "rotate" => {
                let clockwise = match rest {
                    "right" | "r" => true,
                    "left" | "l" => false,
                    _ => bail!("Usage: rotate left|right"),
                };
                let file = self.manager.current_mut()?;
                file.rotate(clockwise);
                let rotation = file.rotation();
                self.print(&format!("Rotation: {}", rotation));
            }
            "flip" => {
                let horizontal = match rest {
                    "h" | "horizontal" => true,
                    "v" | "vertical" => false,
                    _ => bail!("Usage: flip h|v"),
                };
                let file = self.manager.current_mut()?;
                file.toggle_flip(horizontal);
                let state = (file.flipped_horizontally(), file.flipped_vertically());
                self.print(&format!("Flipped: horizontal={} vertical={}", state.0, state.1));
            }
            "export" => self.export(rest)?,
            "thumb" => self.thumb(rest)?,
            "open" => {
                let args: Vec<PathBuf> = rest.split_whitespace().map(PathBuf::from).collect();
                if args.is_empty() {
                    bail!("Usage: open PATH...");
                }
                self.open(&args)?;
            }
            "extract" => self.extract()?,
            "stats" => self.stats(),
            other => bail!("Unknown command '{}', type 'help'", other),
        }

        Ok(Flow::Continue)
    }

    /// React to list notifications raised by the last command.
    fn flush_events(&mut self) {
        let last = self.events.borrow_mut().drain(..).last();
        match last {
            Some(ListEvent::Empty) => {
                self.worker.clear();
                self.print("No more files");
            }
            Some(ListEvent::Modified) => {
                self.print_status();
                self.warm_up();
            }
            None => {}
        }
    }

    fn print_status(&self) {
        if let Ok(file) = self.manager.current() {
            self.print(&format!(
                "[{}/{}] {}",
                self.manager.index() + 1,
                self.manager.len(),
                file.path().display()
            ));
        }
    }

    /// Decode the neighbours of the current file in the background.
    fn warm_up(&self) {
        self.worker.clear();
        let neighbours = [self.manager.next(), self.manager.prev()];
        for file in neighbours.into_iter().flatten() {
            if !file.kind().is_decodable() {
                continue;
            }
            let file = file.clone();
            self.worker.push(
                move || {
                    preview::preview(&file);
                    Ok(file.path().to_path_buf())
                },
                |path| trace!(?path, "Preview warmed up"),
            );
        }
    }

    fn record(&mut self, action: Action) {
        let line = match action.severity() {
            Severity::Normal => action.description().to_string(),
            severity => format!("[{}] {}", severity, action.description()),
        };
        self.print(&line);
        self.last_action = Some((action.severity(), action.description().to_string()));
        self.undo_stack.push(action);
    }

    fn undo(&mut self) -> Result<()> {
        let Some(action) = self.undo_stack.last_mut() else {
            self.print("Nothing to undo!");
            return Ok(());
        };

        // A failed undo stays on the stack
        let description = action.description().to_string();
        action.undo(&mut self.manager)?;
        self.undo_stack.pop();
        info!(%description, "Undone");
        self.print(&format!("Undone: {}", description));
        self.last_action = self.undo_stack.last().map(|a| (a.severity(), a.description().to_string()));
        Ok(())
    }

    fn sort(&mut self, args: &str) -> Result<()> {
        let mut words = args.split_whitespace();
        let key = words.next();
        let reverse = match words.next() {
            None => false,
            Some("rev" | "reverse") => true,
            Some(_) => bail!("Usage: sort name|date [rev]"),
        };

        match key {
            Some("name") => self.manager.sort_by_name(reverse),
            Some("date") => self.manager.sort_by_date(reverse),
            _ => bail!("Usage: sort name|date [rev]"),
        }
        Ok(())
    }

    fn rename(&mut self, name: &str) -> Result<()> {
        let target = Path::new(name);
        let new_path = if target.components().count() > 1 {
            target.to_path_buf()
        } else {
            self.manager.current()?.dirname().join(target)
        };

        let action = self.manager.rename_current(&new_path)?;
        self.record(action);
        Ok(())
    }

    /// Relative targets resolve against the base directory, when set.
    fn resolve_target(&self, dir: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if dir.is_relative() => base.join(dir),
            _ => dir.to_path_buf(),
        }
    }

    fn move_to(&mut self, dir: &Path) -> Result<()> {
        let action = self.manager.move_current(dir, None)?;
        self.record(action);

        self.last_targets.retain(|d| d != dir);
        self.last_targets.insert(0, dir.to_path_buf());
        if let Err(err) = self.store.record_target(dir) {
            warn!(error = %err, "Failed to remember target");
        }
        Ok(())
    }

    fn target(&mut self, args: &str) -> Result<()> {
        let (slot, dir) = match args.split_once(char::is_whitespace) {
            Some((slot, dir)) => (slot, Some(dir.trim())),
            None => (args, None),
        };
        let slot: u8 = slot
            .parse()
            .ok()
            .filter(|s| *s <= MAX_SLOT)
            .with_context(|| format!("Target slot must be between 0 and {}", MAX_SLOT))?;

        match dir {
            Some(dir) => {
                let dir = self.resolve_target(Path::new(dir));
                self.store.set_target(slot, &dir)?;
                self.print(&format!("Target {} set to '{}'", slot, dir.display()));
            }
            None => match self.store.target(slot)? {
                Some(dir) => self.move_to(&dir)?,
                None => self.print(&format!("Target {} is not set", slot)),
            },
        }
        Ok(())
    }

    fn list_targets(&self) -> Result<()> {
        let targets = self.store.targets()?;
        if targets.is_empty() {
            self.print("No targets set");
        }
        for (slot, dir) in targets {
            self.print(&format!("{}: {}", slot, dir.display()));
        }
        Ok(())
    }

    fn info(&self) -> Result<()> {
        let file = self.manager.current()?;

        self.print(&format!(
            "[{}/{}] {}",
            self.manager.index() + 1,
            self.manager.len(),
            file.basename()
        ));
        self.print(&format!("Path: {}", file.path().display()));
        self.print(&format!("Kind: {}", file.kind()));
        self.print(&format!("Size: {}", file.size()?));
        self.print(&format!("Modified: {}", file.modified()?));
        self.print(&format!("Accessed: {}", file.accessed()?));
        // Not every filesystem records a birth time
        if let Ok(created) = file.created() {
            self.print(&format!("Created: {}", created));
        }
        self.print(&format!("Dimensions: {}", preview::dimensions(file)));
        if let Some(stats) = preview::cache_stats(file.kind()) {
            self.print(&format!("Preview cache: {}", stats));
        }
        self.print(&format!("Digest: {}", file.digest()?));
        self.print(&format!(
            "Base dir: {}",
            self.base_dir
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| "(none)".into())
        ));
        self.print(&format!(
            "Last target: {}",
            self.last_targets
                .first()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| "(none)".into())
        ));
        match &self.last_action {
            Some((severity, description)) => {
                self.print(&format!("Last action: {} ({})", description, severity))
            }
            None => self.print("Last action: (none)"),
        }
        self.print(&format!("Sort: {}", self.manager.sort_order()));

        match system::process_memory() {
            Ok(memory) => self.print(&format!("Memory: {}", memory)),
            Err(err) => debug!(error = %err, "Memory usage unavailable"),
        }
        Ok(())
    }

    fn export(&self, args: &str) -> Result<()> {
        let words: Vec<&str> = args.split_whitespace().collect();
        let (path, size) = match words.as_slice() {
            [path] => (*path, None),
            [path, w, h] => {
                let w: u32 = w.parse().context("Width must be a positive integer")?;
                let h: u32 = h.parse().context("Height must be a positive integer")?;
                (*path, Some((w, h)))
            }
            _ => bail!("Usage: export PATH [W H]"),
        };

        let file = self.manager.current()?;
        let source = preview::dimensions(file);
        let quarter_turn = matches!(file.rotation(), 90 | 270);
        let (width, height) = match size {
            Some((w, h)) if quarter_turn => preview::fit_dimensions(source, h as f64, w as f64),
            Some((w, h)) => preview::fit_dimensions(source, w as f64, h as f64),
            None => (source.width, source.height),
        };

        let rendered = preview::render(file, width, height);
        ThumbnailGenerator::save_image(&rendered, Path::new(path))?;

        let (w, h) = rendered.dimensions();
        self.print(&format!("Exported '{}' ({}x{})", path, w, h));
        Ok(())
    }

    fn thumb(&self, args: &str) -> Result<()> {
        let words: Vec<&str> = args.split_whitespace().collect();
        let [source, out] = words.as_slice() else {
            bail!("Usage: thumb PATH OUT");
        };
        let (source, out) = (Path::new(source), Path::new(out));

        let dims = if source.is_dir() {
            let image = DirectoryThumbnail::new(source, DEFAULT_THUMB_HEIGHT).image()?;
            let image = image::DynamicImage::ImageRgba8((*image).clone());
            ThumbnailGenerator::save_image(&image, out)?;
            image.dimensions()
        } else {
            let file = crate::media::MediaFile::new(source);
            let dims = ThumbnailGenerator::generate(&file, out, DEFAULT_THUMB_HEIGHT)?;
            (dims.width, dims.height)
        };

        self.print(&format!("Thumbnail '{}' ({}x{})", out.display(), dims.0, dims.1));
        Ok(())
    }

    fn stats(&self) {
        let paths: Vec<PathBuf> = self
            .manager
            .files()
            .iter()
            .map(|f| f.path().to_path_buf())
            .collect();

        let counter = FileScanner::stats(&paths);
        if counter.is_empty() {
            self.print("No files");
        }
        for (kind, count) in counter {
            self.print(&format!("'{}': {} files", kind, count));
        }
    }

    fn extract(&mut self) -> Result<()> {
        if self.extracting {
            bail!("An extraction is already running");
        }

        let file = self.manager.current()?;
        if file.kind() != MediaKind::Archive {
            bail!("'{}' is not an archive", file.path().display());
        }

        let stem = file
            .path()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".into());
        let destination =
            std::env::temp_dir().join(format!("mediasort-{}-{}", stem, std::process::id()));

        let extraction = Extraction::new(file.path(), &destination)?;
        if extraction.is_empty() {
            bail!("'{}' is empty", file.path().display());
        }
        let entries = extraction.len();
        info!(archive = ?file.path(), ?destination, entries, "Extracting");
        self.print(&format!("Extracting {} entries to '{}'", entries, destination.display()));

        let printer = self.printer.clone();
        let this = self.this.clone();
        Updater::spawn(
            &self.context,
            "extract",
            extraction,
            move |progress: ExtractProgress| {
                printer(&format!(
                    "{:>3.0}% {}",
                    progress.fraction * 100.0,
                    progress.entry
                ));
            },
            move || {
                let Some(session) = this.upgrade() else {
                    return;
                };
                let mut session = session.borrow_mut();
                session.extracting = false;
                if let Err(err) = session.finish_extraction(&destination) {
                    session.print(&format!("Error: {:#}", err));
                }
            },
        )?;

        self.extracting = true;
        Ok(())
    }

    fn finish_extraction(&mut self, destination: &Path) -> Result<()> {
        let scanner = FileScanner::new(self.scanner.filter().clone(), true);
        let result = scanner.files_from_args(&[destination.to_path_buf()])?;
        if result.files.is_empty() {
            return Err(anyhow!(
                "No browsable files in '{}'",
                destination.display()
            ));
        }

        self.print(&format!("Extracted to '{}'", destination.display()));
        self.undo_stack.clear();
        self.manager.set_files(result.files, None);
        self.flush_events();
        Ok(())
    }
}

/// Count argument of `next`/`prev`, 1 when absent.
fn parse_count(args: &str) -> Result<usize> {
    if args.is_empty() {
        return Ok(1);
    }
    args.parse()
        .with_context(|| format!("Invalid count '{}'", args))
}

fn required<'a>(args: &'a str, usage: &str) -> Result<&'a str> {
    if args.is_empty() {
        bail!("Usage: {}", usage);
    }
    Ok(args)
}

/// Forward stdin lines into a channel read by the main context.
pub fn stdin_lines() -> Result<async_channel::Receiver<String>> {
    use std::io::BufRead;

    let (tx, rx) = async_channel::unbounded();
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send_blocking(line).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "Failed to read stdin");
                        break;
                    }
                }
            }
            debug!("Input closed");
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

/// Feed `lines` to the session until `quit` or the end of input.
pub async fn run(session: Rc<RefCell<Session>>, lines: async_channel::Receiver<String>) {
    while let Ok(line) = lines.recv().await {
        let flow = session.borrow_mut().handle_line(&line);
        if flow == Flow::Quit {
            break;
        }
    }
    info!("Session ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trash::TrashDir;
    use image::{Rgb, RgbImage};
    use std::fs;
    use std::io::Write;
    use std::time::{Duration, Instant};
    use tempfile::{tempdir, TempDir};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    struct Fixture {
        dir: TempDir,
        ctx: glib::MainContext,
        session: Rc<RefCell<Session>>,
        output: Rc<RefCell<Vec<String>>>,
    }

    impl Fixture {
        /// Session over `src/` holding small PNGs named `names`.
        fn new(ctx: &glib::MainContext, names: &[&str]) -> Self {
            let dir = tempdir().unwrap();
            let src = dir.path().join("src");
            fs::create_dir(&src).unwrap();
            for (i, name) in names.iter().enumerate() {
                RgbImage::from_pixel(4 + i as u32, 2, Rgb([i as u8, 0, 0]))
                    .save(src.join(name))
                    .unwrap();
            }

            let output = Rc::new(RefCell::new(Vec::new()));
            let sink = output.clone();
            let printer: Printer = Rc::new(move |line: &str| sink.borrow_mut().push(line.to_string()));

            let session = Session::new(
                ctx,
                FileScanner::default(),
                Box::new(TrashDir::new(dir.path().join("Trash"))),
                SessionStore::open_in_memory().unwrap(),
                printer,
            )
            .unwrap();
            session.borrow_mut().open(&[src]).unwrap();

            Self {
                dir,
                ctx: ctx.clone(),
                session,
                output,
            }
        }

        fn run(&self, line: &str) -> Vec<String> {
            self.output.borrow_mut().clear();
            self.session.borrow_mut().handle_line(line);
            self.output.borrow().clone()
        }

        fn path(&self, relative: &str) -> PathBuf {
            self.dir.path().join(relative)
        }

        fn current_name(&self) -> String {
            self.session.borrow().manager().current().unwrap().basename()
        }

        fn run_until(&self, done: impl Fn(&Self) -> bool) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !done(self) {
                assert!(Instant::now() < deadline, "timed out");
                if !self.ctx.iteration(false) {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    fn with_context(test: impl FnOnce(&glib::MainContext)) {
        let ctx = glib::MainContext::new();
        ctx.with_thread_default(|| test(&ctx)).unwrap();
    }

    #[test]
    fn test_navigation_prints_status() {
        with_context(|ctx| {
            let fx = Fixture::new(ctx, &["a.png", "b.png", "c.png"]);

            let out = fx.run("next 2");
            assert_eq!(out.len(), 1);
            assert!(out[0].starts_with("[3/3]"));
            assert!(out[0].ends_with("c.png"));

            fx.run("next");
            assert_eq!(fx.current_name(), "a.png");
            fx.run("last");
            assert_eq!(fx.current_name(), "c.png");
            fx.run("prev");
            assert_eq!(fx.current_name(), "b.png");
        });
    }

    #[test]
    fn test_move_reuse_and_undo() {
        with_context(|ctx| {
            let fx = Fixture::new(ctx, &["a.png", "b.png", "c.png"]);
            let out = fx.run("reuse");
            assert_eq!(out, vec!["There isn't a selected target yet"]);

            let keep = fx.path("keep");
            fs::create_dir(&keep).unwrap();

            let out = fx.run(&format!("move {}", keep.display()));
            assert!(out[0].contains("moved to"));
            assert!(keep.join("a.png").exists());

            fx.run("reuse");
            assert!(keep.join("b.png").exists());
            assert_eq!(fx.current_name(), "c.png");

            let out = fx.run("undo");
            assert!(out[0].starts_with("Undone: "));
            assert!(fx.path("src/b.png").exists());
            assert_eq!(fx.current_name(), "b.png");

            fx.run("undo");
            let out = fx.run("undo");
            assert_eq!(out, vec!["Nothing to undo!"]);
        });
    }

    #[test]
    fn test_base_dir_and_target_slots() {
        with_context(|ctx| {
            let fx = Fixture::new(ctx, &["a.png", "b.png"]);
            fs::create_dir_all(fx.path("sorted/cats")).unwrap();

            fx.run(&format!("base {}", fx.path("sorted").display()));
            let out = fx.run("target 1 cats");
            assert_eq!(
                out,
                vec![format!("Target 1 set to '{}'", fx.path("sorted/cats").display())]
            );

            fx.run("target 1");
            assert!(fx.path("sorted/cats/a.png").exists());

            let out = fx.run("target 2");
            assert_eq!(out, vec!["Target 2 is not set"]);
            let out = fx.run("targets");
            assert_eq!(out, vec![format!("1: {}", fx.path("sorted/cats").display())]);
            let out = fx.run("target 12 cats");
            assert!(out[0].starts_with("Error: "));
        });
    }

    #[test]
    fn test_rename_never_overwrites() {
        with_context(|ctx| {
            let fx = Fixture::new(ctx, &["a.png", "b.png"]);

            let out = fx.run("rename b.png");
            assert_eq!(out.len(), 1);
            assert!(out[0].starts_with("Error: "));
            assert!(out[0].ends_with("already exists!"));

            fx.run("rename z.png");
            assert!(fx.path("src/z.png").exists());
            assert_eq!(fx.current_name(), "z.png");
        });
    }

    #[test]
    fn test_delete_everything_reports_no_more_files() {
        with_context(|ctx| {
            let fx = Fixture::new(ctx, &["only.png"]);

            let out = fx.run("delete");
            assert!(out[0].starts_with("[danger] "));
            assert_eq!(out.last().unwrap(), "No more files");

            let out = fx.run("next");
            assert!(out.is_empty());
            let out = fx.run("info");
            assert!(out[0].starts_with("Error: "));

            fx.run("undo");
            assert!(fx.path("src/only.png").exists());
            assert_eq!(fx.current_name(), "only.png");
        });
    }

    #[test]
    fn test_failed_undo_stays_on_stack() {
        with_context(|ctx| {
            let fx = Fixture::new(ctx, &["a.png", "b.png"]);
            fx.run("delete");
            fs::write(fx.path("src/a.png"), b"newcomer").unwrap();

            let out = fx.run("undo");
            assert!(out[0].starts_with("Error: "));

            fs::remove_file(fx.path("src/a.png")).unwrap();
            let out = fx.run("undo");
            assert!(out[0].starts_with("Undone: "));
            assert_eq!(fx.current_name(), "a.png");
            assert_eq!(fx.run("undo"), vec!["Nothing to undo!"]);
        });
    }

    #[test]
    fn test_star_and_info() {
        with_context(|ctx| {
            let fx = Fixture::new(ctx, &["cat.png"]);
            fx.run("star");
            assert_eq!(fx.current_name(), "cat (S).png");

            let out = fx.run("info");
            assert!(out.iter().any(|l| l == "Kind: image"));
            assert!(out.iter().any(|l| l == "Dimensions: 4x2"));
            assert!(out.iter().any(|l| l.starts_with("Accessed: ")));
            assert!(out.iter().any(|l| l.starts_with("Preview cache: ") && l.ends_with(" entries")));
            assert!(out.iter().any(|l| l == "Last action: 'cat.png' starred (normal)"));
            assert!(out.iter().any(|l| l == "Sort: name"));
        });
    }

    #[test]
    fn test_rotate_and_export() {
        with_context(|ctx| {
            let fx = Fixture::new(ctx, &["wide.png"]);
            let out = fx.run("rotate right");
            assert_eq!(out, vec!["Rotation: 90"]);

            let exported = fx.path("out/wide.jpg");
            let out = fx.run(&format!("export {}", exported.display()));
            assert!(out[0].ends_with("(2x4)"));
            assert_eq!(image::open(&exported).unwrap().dimensions(), (2, 4));
        });
    }

    #[test]
    fn test_sort_and_reverse() {
        with_context(|ctx| {
            let fx = Fixture::new(ctx, &["a.png", "b.png", "c.png"]);
            fx.run("reverse");
            assert_eq!(fx.session.borrow().manager().sort_order().to_string(), "name (reversed)");
            assert_eq!(fx.current_name(), "a.png");
            fx.run("first");
            assert_eq!(fx.current_name(), "c.png");

            let out = fx.run("sort size");
            assert!(out[0].starts_with("Error: Usage"));
        });
    }

    #[test]
    fn test_stats_and_unknown_command() {
        with_context(|ctx| {
            let fx = Fixture::new(ctx, &["a.png", "b.png"]);
            assert_eq!(fx.run("stats"), vec!["'image': 2 files"]);

            let out = fx.run("dance");
            assert_eq!(out, vec!["Error: Unknown command 'dance', type 'help'"]);
            assert_eq!(fx.session.borrow_mut().handle_line("quit"), Flow::Quit);
        });
    }

    #[test]
    fn test_extract_browses_archive() {
        with_context(|ctx| {
            let fx = Fixture::new(ctx, &["a.png"]);
            fs::create_dir(fx.path("archives")).unwrap();
            let archive = fx.path("archives/pages.zip");
            {
                let mut zip = ZipWriter::new(fs::File::create(&archive).unwrap());
                let mut png = Vec::new();
                RgbImage::new(2, 2)
                    .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
                    .unwrap();
                for name in ["p1.png", "p2.png"] {
                    zip.start_file(name, SimpleFileOptions::default()).unwrap();
                    zip.write_all(&png).unwrap();
                }
                zip.finish().unwrap();
            }

            fx.run(&format!("open {}", archive.display()));
            assert_eq!(fx.current_name(), "pages.zip");

            let out = fx.run("extract");
            assert!(out[0].starts_with("Extracting 2 entries"));

            fx.run_until(|fx| fx.output.borrow().iter().any(|l| l.starts_with("Extracted to")));
            assert_eq!(fx.session.borrow().manager().len(), 2);
            assert_eq!(fx.current_name(), "p1.png");

            let destination = fx.session.borrow().manager().current().unwrap().dirname().to_path_buf();
            fs::remove_dir_all(destination).unwrap();
        });
    }

    #[test]
    fn test_extract_requires_archive() {
        with_context(|ctx| {
            let fx = Fixture::new(ctx, &["a.png"]);
            let out = fx.run("extract");
            assert!(out[0].contains("is not an archive"));
        });
    }
}
