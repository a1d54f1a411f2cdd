use rusqlite::Connection;

pub fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS work_items (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL CHECK (source IN ('remote', 'local')),
            source_ref TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL CHECK (status IN (
                'todo', 'acquiring', 'acquired', 'transcribing',
                'transcribed', 'ingesting', 'done', 'failed'
            )),
            retries INTEGER NOT NULL DEFAULT 0,
            duration_sec INTEGER,
            media_path TEXT,
            transcript_path TEXT,
            claimed_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            error TEXT
        );

        CREATE TABLE IF NOT EXISTS segments (
            work_item_id TEXT NOT NULL REFERENCES work_items(id),
            start_sec REAL NOT NULL,
            end_sec REAL NOT NULL,
            text TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (work_item_id, start_sec)
        );

        CREATE TABLE IF NOT EXISTS analysis (
            work_item_id TEXT PRIMARY KEY REFERENCES work_items(id),
            summary TEXT NOT NULL DEFAULT '',
            topics TEXT NOT NULL DEFAULT '[]',
            key_terms TEXT NOT NULL DEFAULT '[]',
            chapters TEXT NOT NULL DEFAULT '[]'
        );

        -- Claim lookups scan one status bucket in creation order
        CREATE INDEX IF NOT EXISTS idx_work_items_status_created
            ON work_items(status, created_at);
        ",
    )
}
