use crate::error::AppError;
use crate::refresh::types::{PriceMove, WatchRow};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

pub trait RowSurface: Send + Sync {
    fn surface_name(&self) -> &str;

    fn row_codes(&self) -> Vec<String>;

    fn visible_codes(&self) -> Option<Vec<String>>;

    fn rows_snapshot(&self) -> Vec<WatchRow>;

    // SurfaceGone once unmounted or the row was removed.
    fn apply_row(&self, row: WatchRow) -> Result<(), AppError>;

    fn clear_changed(&self);
}

#[derive(Debug, Default)]
struct RowTable {
    rows: Vec<WatchRow>,
    index: HashMap<String, usize>,
}

impl RowTable {
    fn rebuild_index(&mut self) {
        self.index = self
            .rows
            .iter()
            .enumerate()
            .map(|(position, row)| (row.code.clone(), position))
            .collect();
    }
}

pub struct MemoryRowStore {
    name: String,
    table: RwLock<RowTable>,
    viewport: RwLock<Option<Range<usize>>>,
    mounted: AtomicBool,
}

impl MemoryRowStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: RwLock::new(RowTable::default()),
            viewport: RwLock::new(None),
            mounted: AtomicBool::new(true),
        }
    }

    pub fn with_rows(name: impl Into<String>, rows: Vec<WatchRow>) -> Self {
        let store = Self::new(name);
        store.replace_rows(rows);
        store
    }

    pub fn replace_rows(&self, rows: Vec<WatchRow>) {
        let mut seen = HashSet::with_capacity(rows.len());
        let rows: Vec<WatchRow> = rows
            .into_iter()
            .filter(|row| seen.insert(row.code.clone()))
            .collect();

        let mut table = self.table.write();
        table.rows = rows;
        table.rebuild_index();
    }

    pub fn remove_row(&self, code: &str) -> Option<WatchRow> {
        let mut table = self.table.write();
        let position = table.index.get(code).copied()?;
        let removed = table.rows.remove(position);
        table.rebuild_index();
        Some(removed)
    }

    pub fn row(&self, code: &str) -> Option<WatchRow> {
        let table = self.table.read();
        table
            .index
            .get(code)
            .and_then(|position| table.rows.get(*position))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.table.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_viewport(&self, viewport: Option<Range<usize>>) {
        *self.viewport.write() = viewport;
    }

    pub fn mount(&self) {
        self.mounted.store(true, Ordering::Release);
    }

    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::Release);
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }
}

impl RowSurface for MemoryRowStore {
    fn surface_name(&self) -> &str {
        &self.name
    }

    fn row_codes(&self) -> Vec<String> {
        self.table
            .read()
            .rows
            .iter()
            .map(|row| row.code.clone())
            .collect()
    }

    fn visible_codes(&self) -> Option<Vec<String>> {
        let viewport = self.viewport.read().clone()?;
        let table = self.table.read();
        let end = viewport.end.min(table.rows.len());
        let start = viewport.start.min(end);
        Some(
            table.rows[start..end]
                .iter()
                .map(|row| row.code.clone())
                .collect(),
        )
    }

    fn rows_snapshot(&self) -> Vec<WatchRow> {
        self.table.read().rows.clone()
    }

    fn apply_row(&self, row: WatchRow) -> Result<(), AppError> {
        if !self.is_mounted() {
            return Err(AppError::SurfaceGone(self.name.clone()));
        }

        let mut table = self.table.write();
        let Some(position) = table.index.get(&row.code).copied() else {
            return Err(AppError::SurfaceGone(format!("{}/{}", self.name, row.code)));
        };
        table.rows[position] = row;
        Ok(())
    }

    fn clear_changed(&self) {
        for row in self.table.write().rows.iter_mut() {
            row.changed = PriceMove::None;
        }
    }
}
