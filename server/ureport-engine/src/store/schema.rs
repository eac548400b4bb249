pub const SCHEMA: &str = "
      CREATE TABLE IF NOT EXISTS opsys (
          id          INTEGER PRIMARY KEY AUTOINCREMENT,
          name        TEXT NOT NULL UNIQUE
      );

      CREATE TABLE IF NOT EXISTS opsysreleases (
          id          INTEGER PRIMARY KEY AUTOINCREMENT,
          opsys_id    INTEGER NOT NULL REFERENCES opsys(id),
          version     TEXT NOT NULL,
          UNIQUE(opsys_id, version)
      );

      CREATE TABLE IF NOT EXISTS archs (
          id          INTEGER PRIMARY KEY AUTOINCREMENT,
          name        TEXT NOT NULL UNIQUE
      );

      CREATE TABLE IF NOT EXISTS components (
          id          INTEGER PRIMARY KEY AUTOINCREMENT,
          name        TEXT NOT NULL UNIQUE
      );

      CREATE TABLE IF NOT EXISTS packages (
          id              INTEGER PRIMARY KEY AUTOINCREMENT,
          opsysrelease_id INTEGER NOT NULL REFERENCES opsysreleases(id),
          component_id    INTEGER NOT NULL REFERENCES components(id),
          arch_id         INTEGER NOT NULL REFERENCES archs(id),
          name            TEXT NOT NULL,
          epoch           INTEGER NOT NULL,
          version         TEXT NOT NULL,
          release         TEXT NOT NULL,
          UNIQUE(opsysrelease_id, name, epoch, version, release, arch_id)
      );

      CREATE TABLE IF NOT EXISTS reports (
          id                INTEGER PRIMARY KEY AUTOINCREMENT,
          type              TEXT NOT NULL,
          component_id      INTEGER NOT NULL REFERENCES components(id),
          first_occurrence  TEXT NOT NULL,
          last_occurrence   TEXT NOT NULL,
          count             INTEGER NOT NULL CHECK (count >= 1),
          errname           TEXT,
          archived          INTEGER NOT NULL DEFAULT 0
      );

      CREATE TABLE IF NOT EXISTS report_hashes (
          report_id     INTEGER NOT NULL REFERENCES reports(id),
          hash          TEXT NOT NULL,
          hash_type     TEXT NOT NULL,
          component_id  INTEGER NOT NULL REFERENCES components(id),
          UNIQUE(hash, hash_type, component_id)
      );

      CREATE TABLE IF NOT EXISTS report_backtraces (
          id          INTEGER PRIMARY KEY AUTOINCREMENT,
          report_id   INTEGER NOT NULL REFERENCES reports(id),
          crashfn     TEXT,
          quality     INTEGER NOT NULL
      );

      CREATE TABLE IF NOT EXISTS report_bt_threads (
          id            INTEGER PRIMARY KEY AUTOINCREMENT,
          backtrace_id  INTEGER NOT NULL REFERENCES report_backtraces(id),
          number        INTEGER,
          crashthread   INTEGER NOT NULL
      );

      CREATE TABLE IF NOT EXISTS symbols (
          id               INTEGER PRIMARY KEY AUTOINCREMENT,
          name             TEXT NOT NULL,
          normalized_path  TEXT NOT NULL,
          UNIQUE(name, normalized_path)
      );

      CREATE TABLE IF NOT EXISTS symbolsources (
          id           INTEGER PRIMARY KEY AUTOINCREMENT,
          build_id     TEXT NOT NULL,
          path         TEXT NOT NULL,
          bin_offset   INTEGER NOT NULL,
          hash         TEXT,
          source_path  TEXT,
          line_number  INTEGER,
          symbol_id    INTEGER REFERENCES symbols(id),
          UNIQUE(build_id, path, bin_offset)
      );

      CREATE TABLE IF NOT EXISTS report_bt_frames (
          thread_id        INTEGER NOT NULL REFERENCES report_bt_threads(id),
          frame_order      INTEGER NOT NULL,
          symbolsource_id  INTEGER NOT NULL REFERENCES symbolsources(id),
          inlined          INTEGER NOT NULL DEFAULT 0,
          reliable         INTEGER NOT NULL DEFAULT 1,
          PRIMARY KEY (thread_id, frame_order)
      );

      CREATE TABLE IF NOT EXISTS report_stats (
          report_id   INTEGER NOT NULL REFERENCES reports(id),
          dimension   TEXT NOT NULL,
          key         TEXT NOT NULL,
          count       INTEGER NOT NULL,
          UNIQUE(report_id, dimension, key)
      );

      CREATE TABLE IF NOT EXISTS report_history (
          report_id        INTEGER NOT NULL REFERENCES reports(id),
          opsysrelease_id  INTEGER NOT NULL REFERENCES opsysreleases(id),
          granularity      TEXT NOT NULL,
          period           TEXT NOT NULL,
          count            INTEGER NOT NULL,
          unique_count     INTEGER NOT NULL DEFAULT 0,
          UNIQUE(report_id, opsysrelease_id, granularity, period)
      );

      CREATE TABLE IF NOT EXISTS history_identities (
          report_id        INTEGER NOT NULL REFERENCES reports(id),
          opsysrelease_id  INTEGER NOT NULL REFERENCES opsysreleases(id),
          granularity      TEXT NOT NULL,
          period           TEXT NOT NULL,
          identity         TEXT NOT NULL,
          UNIQUE(report_id, opsysrelease_id, granularity, period, identity)
      );

      CREATE TABLE IF NOT EXISTS report_bugs (
          report_id        INTEGER NOT NULL REFERENCES reports(id),
          url              TEXT NOT NULL,
          opsysrelease_id  INTEGER REFERENCES opsysreleases(id),
          UNIQUE(report_id, url)
      );

      CREATE TABLE IF NOT EXISTS invalid_ureports (
          id           INTEGER PRIMARY KEY AUTOINCREMENT,
          errormsg     TEXT NOT NULL,
          reporter     TEXT,
          received_at  TEXT NOT NULL,
          payload      TEXT NOT NULL
      );

      CREATE TABLE IF NOT EXISTS unknown_opsys (
          name     TEXT NOT NULL,
          version  TEXT NOT NULL,
          count    INTEGER NOT NULL,
          UNIQUE(name, version)
      );

      CREATE INDEX IF NOT EXISTS idx_reports_component ON reports(component_id);
      CREATE INDEX IF NOT EXISTS idx_report_hashes_report ON report_hashes(report_id);
      CREATE INDEX IF NOT EXISTS idx_backtraces_report ON report_backtraces(report_id);
      CREATE INDEX IF NOT EXISTS idx_threads_backtrace ON report_bt_threads(backtrace_id);
      CREATE INDEX IF NOT EXISTS idx_frames_symbolsource ON report_bt_frames(symbolsource_id);
      CREATE INDEX IF NOT EXISTS idx_history_report ON report_history(report_id);
      CREATE INDEX IF NOT EXISTS idx_bugs_report ON report_bugs(report_id);
      ";
