//! Patch-driven concatenation
//!
//! [`SimpleConcat`] keeps the files of the previous build and is updated
//! with one call per patch operation. Unaffected files are never re-read
//! unless their content was too large to keep in memory.

use ahash::AHashMap;
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

/// One tracked input file
#[derive(Debug, Clone)]
struct FileEntry {
    path: PathBuf,
    /// Content, kept only when within the size limit
    cached: Option<String>,
}

impl FileEntry {
    fn new(path: PathBuf) -> Self {
        Self { path, cached: None }
    }

    fn content(&mut self, limit: usize) -> io::Result<String> {
        if let Some(content) = &self.cached {
            return Ok(content.clone());
        }
        let content = String::from_utf8_lossy(&std::fs::read(&self.path)?).into_owned();
        if content.len() <= limit {
            self.cached = Some(content.clone());
        }
        Ok(content)
    }
}

/// Which section a tracked file belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Header,
    Body,
    Footer,
}

/// Incrementally maintained concatenation
#[derive(Debug)]
pub struct SimpleConcat {
    header: Option<String>,
    footer: Option<String>,
    separator: String,
    content_limit: usize,
    header_order: Vec<String>,
    footer_order: Vec<String>,
    /// Header and footer files currently present
    fixed: AHashMap<String, FileEntry>,
    /// Body files, sorted by relative path
    body: BTreeMap<String, FileEntry>,
    sizes: BTreeMap<String, u64>,
}

impl SimpleConcat {
    pub fn new(
        header: Option<String>,
        footer: Option<String>,
        separator: impl Into<String>,
        header_files: Vec<String>,
        footer_files: Vec<String>,
        content_limit: usize,
    ) -> Self {
        Self {
            header,
            footer,
            separator: separator.into(),
            content_limit,
            header_order: header_files,
            footer_order: footer_files,
            fixed: AHashMap::new(),
            body: BTreeMap::new(),
            sizes: BTreeMap::new(),
        }
    }

    fn section_of(&self, relative_path: &str) -> Section {
        if self.header_order.iter().any(|f| f == relative_path) {
            Section::Header
        } else if self.footer_order.iter().any(|f| f == relative_path) {
            Section::Footer
        } else {
            Section::Body
        }
    }

    /// Track a new file
    pub fn add_file(&mut self, relative_path: &str, path: PathBuf) {
        let entry = FileEntry::new(path);
        match self.section_of(relative_path) {
            Section::Body => {
                self.body.insert(relative_path.to_string(), entry);
            }
            Section::Header | Section::Footer => {
                self.fixed.insert(relative_path.to_string(), entry);
            }
        }
    }

    /// Forget the cached content of a file so it is read again
    pub fn update_file(&mut self, relative_path: &str, path: PathBuf) {
        self.add_file(relative_path, path);
    }

    /// Stop tracking a file
    pub fn remove_file(&mut self, relative_path: &str) {
        self.body.remove(relative_path);
        self.fixed.remove(relative_path);
        self.sizes.remove(relative_path);
    }

    /// Number of tracked files
    pub fn file_count(&self) -> usize {
        self.body.len() + self.fixed.len()
    }

    /// Byte size of every file in the last `result()`
    pub fn sizes(&self) -> &BTreeMap<String, u64> {
        &self.sizes
    }

    /// Join all sections; `None` when no file is tracked
    pub fn result(&mut self) -> io::Result<Option<String>> {
        if self.file_count() == 0 {
            return Ok(None);
        }

        let limit = self.content_limit;
        let mut parts: Vec<String> = Vec::with_capacity(self.file_count() + 2);
        let mut sizes = BTreeMap::new();

        if let Some(header) = &self.header {
            parts.push(header.clone());
        }
        for name in &self.header_order {
            if let Some(entry) = self.fixed.get_mut(name) {
                let content = entry.content(limit)?;
                sizes.insert(name.clone(), content.len() as u64);
                parts.push(content);
            }
        }
        for (name, entry) in self.body.iter_mut() {
            let content = entry.content(limit)?;
            sizes.insert(name.clone(), content.len() as u64);
            parts.push(content);
        }
        for name in &self.footer_order {
            if let Some(entry) = self.fixed.get_mut(name) {
                let content = entry.content(limit)?;
                sizes.insert(name.clone(), content.len() as u64);
                parts.push(content);
            }
        }
        if let Some(footer) = &self.footer {
            parts.push(footer.clone());
        }

        self.sizes = sizes;
        Ok(Some(parts.join(&self.separator)))
    }
}
