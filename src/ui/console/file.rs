use crate::dbgp::lock;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::{fs, io};

/// Source code around the current position. Files are read once and cached.
#[derive(Default)]
pub struct FileView {
    cached_lines: Mutex<HashMap<PathBuf, Box<[String]>>>,
}

impl FileView {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self::default()
    }

    fn render(&self, file_path: &Path, start: u32, length: u32, mark: u32) -> io::Result<String> {
        let mut cache = lock(&self.cached_lines);
        if !cache.contains_key(file_path) {
            let file = fs::File::open(file_path)?;
            let lines = io::BufReader::new(file)
                .lines()
                .map_while(Result::ok)
                .collect::<Vec<_>>();
            cache.insert(file_path.to_path_buf(), lines.into_boxed_slice());
        }
        let Some(file_lines) = cache.get(file_path) else {
            return Ok(String::new());
        };

        let result = file_lines
            .iter()
            .enumerate()
            .skip(start as usize)
            .take(length as usize)
            .map(|(i, line)| {
                let line_number = i as u32 + 1;
                let marker = if line_number == mark { ">" } else { " " };
                format!("{marker}{line_number:>4} {line}\n")
            })
            .collect();
        Ok(result)
    }

    /// Render up to `bounds` lines before and after `line` (1-based), the line itself is marked.
    /// The window is clipped at the file start and end.
    pub fn render_source(&self, file: &Path, line: u32, bounds: u32) -> io::Result<String> {
        let line = line.max(1);
        let start = (line - 1).saturating_sub(bounds);
        let end = line.saturating_add(bounds);
        self.render(file, start, end - start, line)
    }

    /// Forget cached content, files are read again on next render.
    pub fn invalidate(&self) {
        lock(&self.cached_lines).clear();
    }
}
