use std::sync::Arc;

use sqlx::PgPool;
use walkworthy_scan::Scanner;
use walkworthy_scan::store::ScanRepository;
use walkworthy_scan::verses::LocalVerseLibrary;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub scanner: Arc<Scanner>,
    pub verse_library: Arc<LocalVerseLibrary>,
}

impl AppState {
    pub fn repository(&self) -> &ScanRepository {
        self.scanner.repository()
    }
}
