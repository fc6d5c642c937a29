use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::catalog::{ImageCatalog, LocalImageEntry};
use crate::sync::SyncOutcome;

pub const NO_IMAGES: &str = "No images available";
pub const LOAD_ERROR: &str = "Error loading image";
pub const SYNCING: &str = "Syncing with Google Drive...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Next,
    Previous,
    Random,
    ToggleSlideshow,
    StopSlideshow,
    Quit,
}

impl Command {
    /// Maps a key name as typed on the terminal (`n`, `right`, `space`, ...) to a command.
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim_end_matches(['\r', '\n']);
        if key == " " {
            return Some(Self::Next);
        }
        match key.trim().to_ascii_lowercase().as_str() {
            "n" | "right" | "space" => Some(Self::Next),
            "p" | "left" => Some(Self::Previous),
            "r" => Some(Self::Random),
            "s" => Some(Self::ToggleSlideshow),
            "esc" | "escape" => Some(Self::StopSlideshow),
            "q" | "quit" => Some(Self::Quit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Image(PathBuf),
    Placeholder(&'static str),
}

impl Frame {
    fn for_entry(entry: LocalImageEntry) -> Self {
        // Eviction may remove a file between catalog refreshes.
        if entry.path.is_file() {
            Self::Image(entry.path)
        } else {
            Self::Placeholder(LOAD_ERROR)
        }
    }
}

/// Display surface for frames and the one-line status area.
pub trait Presenter {
    fn show(&mut self, frame: &Frame);
    fn status(&mut self, text: &str);
}

/// Headless presenter that logs what a screen would display.
#[derive(Debug, Default)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn show(&mut self, frame: &Frame) {
        match frame {
            Frame::Image(path) => info!(image = %path.display(), "showing image"),
            Frame::Placeholder(text) => info!(placeholder = text, "showing placeholder"),
        }
    }

    fn status(&mut self, text: &str) {
        info!(status = text, "status");
    }
}

/// Navigation and slideshow state over a shared catalog. Starts paused.
pub struct Slideshow {
    catalog: Arc<ImageCatalog>,
    playing: bool,
}

impl Slideshow {
    pub fn new(catalog: Arc<ImageCatalog>) -> Self {
        Self {
            catalog,
            playing: false,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn current_frame(&self) -> Frame {
        self.catalog
            .current()
            .map_or(Frame::Placeholder(NO_IMAGES), Frame::for_entry)
    }

    /// Applies a navigation command. Returns the frame to display when it changed.
    pub fn apply(&mut self, command: Command) -> Option<Frame> {
        match command {
            Command::Next => self.catalog.advance().map(Frame::for_entry),
            Command::Previous => self.catalog.retreat().map(Frame::for_entry),
            Command::Random => self.catalog.random_jump().map(Frame::for_entry),
            Command::ToggleSlideshow => {
                self.playing = !self.playing;
                None
            }
            Command::StopSlideshow => {
                self.playing = false;
                None
            }
            Command::Quit => None,
        }
    }

    /// Slideshow timer callback; only advances while playing.
    pub fn tick(&mut self) -> Option<Frame> {
        if !self.playing {
            return None;
        }
        self.catalog.advance().map(Frame::for_entry)
    }
}

pub fn sync_status_text(outcome: &SyncOutcome) -> String {
    let mut text = if outcome.files_synced > 0 {
        format!(
            "Sync completed: {} new images downloaded",
            outcome.files_synced
        )
    } else {
        "Sync completed: No new images".to_string()
    };
    if outcome.errors > 0 {
        text.push_str(&format!(", {} errors", outcome.errors));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ExtensionSet;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_png(path: &Path) {
        image::RgbImage::new(2, 2).save(path).unwrap();
    }

    fn catalog_with(dir: &Path, names: &[&str]) -> Arc<ImageCatalog> {
        for name in names {
            write_png(&dir.join(name));
        }
        let catalog = ImageCatalog::with_rng(
            dir.to_path_buf(),
            ExtensionSet::default(),
            StdRng::seed_from_u64(7),
        );
        catalog.refresh().unwrap();
        Arc::new(catalog)
    }

    #[test]
    fn keys_map_to_commands() {
        assert_eq!(Command::from_key("n"), Some(Command::Next));
        assert_eq!(Command::from_key("Right\n"), Some(Command::Next));
        assert_eq!(Command::from_key(" "), Some(Command::Next));
        assert_eq!(Command::from_key("space"), Some(Command::Next));
        assert_eq!(Command::from_key("p"), Some(Command::Previous));
        assert_eq!(Command::from_key("left"), Some(Command::Previous));
        assert_eq!(Command::from_key("R"), Some(Command::Random));
        assert_eq!(Command::from_key("s"), Some(Command::ToggleSlideshow));
        assert_eq!(Command::from_key("esc"), Some(Command::StopSlideshow));
        assert_eq!(Command::from_key("q"), Some(Command::Quit));
        assert_eq!(Command::from_key("x"), None);
    }

    #[test]
    fn empty_catalog_shows_no_images_and_ignores_navigation() {
        let dir = tempdir().unwrap();
        let mut show = Slideshow::new(catalog_with(dir.path(), &[]));

        assert_eq!(show.current_frame(), Frame::Placeholder(NO_IMAGES));
        assert_eq!(show.apply(Command::Next), None);
        assert_eq!(show.apply(Command::Random), None);
    }

    #[test]
    fn navigation_wraps_around() {
        let dir = tempdir().unwrap();
        let mut show = Slideshow::new(catalog_with(dir.path(), &["a.png", "b.png"]));

        assert_eq!(show.current_frame(), Frame::Image(dir.path().join("a.png")));
        assert_eq!(
            show.apply(Command::Next),
            Some(Frame::Image(dir.path().join("b.png")))
        );
        assert_eq!(
            show.apply(Command::Next),
            Some(Frame::Image(dir.path().join("a.png")))
        );
        assert_eq!(
            show.apply(Command::Previous),
            Some(Frame::Image(dir.path().join("b.png")))
        );
    }

    #[test]
    fn vanished_file_shows_load_error() {
        let dir = tempdir().unwrap();
        let mut show = Slideshow::new(catalog_with(dir.path(), &["a.png", "b.png"]));
        std::fs::remove_file(dir.path().join("b.png")).unwrap();

        assert_eq!(
            show.apply(Command::Next),
            Some(Frame::Placeholder(LOAD_ERROR))
        );
    }

    #[test]
    fn tick_advances_only_while_playing() {
        let dir = tempdir().unwrap();
        let mut show = Slideshow::new(catalog_with(dir.path(), &["a.png", "b.png"]));

        assert!(!show.is_playing());
        assert_eq!(show.tick(), None);

        show.apply(Command::ToggleSlideshow);
        assert!(show.is_playing());
        assert_eq!(show.tick(), Some(Frame::Image(dir.path().join("b.png"))));

        show.apply(Command::StopSlideshow);
        assert_eq!(show.tick(), None);
        show.apply(Command::StopSlideshow);
        assert!(!show.is_playing());
    }

    #[test]
    fn status_text_reports_counts() {
        let outcome = |files_synced, errors| SyncOutcome {
            files_synced,
            errors,
            already_present: 0,
        };
        assert_eq!(
            sync_status_text(&outcome(3, 0)),
            "Sync completed: 3 new images downloaded"
        );
        assert_eq!(
            sync_status_text(&outcome(0, 0)),
            "Sync completed: No new images"
        );
        assert_eq!(
            sync_status_text(&outcome(2, 1)),
            "Sync completed: 2 new images downloaded, 1 errors"
        );
    }
}
