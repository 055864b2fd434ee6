use log::{debug, info};
use rusqlite::Connection;

use crate::error::UpkeepError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ObjectKind {
    View,
    Index,
    Trigger,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 3] = [ObjectKind::View, ObjectKind::Index, ObjectKind::Trigger];

    fn catalog_type(&self) -> &'static str {
        match self {
            ObjectKind::View => "view",
            ObjectKind::Index => "index",
            ObjectKind::Trigger => "trigger",
        }
    }
}

/// A derived schema object and the statement that defines it.
///
/// `pre_sql` runs immediately before `create_sql` every time the object is rebuilt and
/// must be safe to repeat.
#[derive(Debug)]
pub struct SchemaObject {
    pub name: &'static str,
    pub kind: ObjectKind,
    pub pre_sql: Option<&'static str>,
    pub create_sql: &'static str,
}

impl SchemaObject {
    const fn view(name: &'static str, create_sql: &'static str) -> Self {
        Self {
            name,
            kind: ObjectKind::View,
            pre_sql: None,
            create_sql,
        }
    }

    const fn index(name: &'static str, create_sql: &'static str) -> Self {
        Self {
            name,
            kind: ObjectKind::Index,
            pre_sql: None,
            create_sql,
        }
    }

    const fn index_after(
        name: &'static str,
        pre_sql: &'static str,
        create_sql: &'static str,
    ) -> Self {
        Self {
            name,
            kind: ObjectKind::Index,
            pre_sql: Some(pre_sql),
            create_sql,
        }
    }

    const fn trigger(name: &'static str, create_sql: &'static str) -> Self {
        Self {
            name,
            kind: ObjectKind::Trigger,
            pre_sql: None,
            create_sql,
        }
    }

    fn drop_sql(&self) -> String {
        format!("DROP {} IF EXISTS {};", self.kind, self.name)
    }

    fn exists(&self, conn: &Connection) -> Result<bool, UpkeepError> {
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = ? AND name = ?",
            [self.kind.catalog_type(), self.name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

/// Views, in creation order. A view that selects from another view must come after it.
pub const VIEWS: &[SchemaObject] = &[
    SchemaObject::view(
        "Events_Devices",
        "CREATE VIEW Events_Devices AS
            SELECT *
            FROM Events
            LEFT JOIN Devices ON eve_MAC = devMac;",
    ),
    // Most recent event per device, restricted to devices seen in the current scan
    SchemaObject::view(
        "LatestEventsPerMAC",
        "CREATE VIEW LatestEventsPerMAC AS
            WITH RankedEvents AS (
                SELECT
                    e.*,
                    ROW_NUMBER() OVER (PARTITION BY e.eve_MAC ORDER BY e.eve_DateTime DESC) AS row_num
                FROM Events AS e
            )
            SELECT
                e.*,
                d.*,
                c.*
            FROM RankedEvents AS e
            LEFT JOIN Devices AS d ON e.eve_MAC = d.devMac
            INNER JOIN CurrentScan AS c ON e.eve_MAC = c.scanMac
            WHERE e.row_num = 1;",
    ),
    SchemaObject::view(
        "Sessions_Devices",
        "CREATE VIEW Sessions_Devices AS
            SELECT *
            FROM Sessions
            LEFT JOIN Devices ON ses_MAC = devMac;",
    ),
    // Pairs each connection event with its disconnection. Unpaired rows report
    // '<missing event>' or, for an open connection, eve_StillConnected = 1.
    SchemaObject::view(
        "Convert_Events_to_Sessions",
        "CREATE VIEW Convert_Events_to_Sessions AS
            SELECT
                EVE1.eve_MAC,
                EVE1.eve_IP,
                EVE1.eve_EventType AS eve_EventTypeConnection,
                EVE1.eve_DateTime AS eve_DateTimeConnection,
                CASE WHEN EVE2.eve_EventType IN ('Disconnected', 'Device Down') OR EVE2.eve_EventType IS NULL
                     THEN EVE2.eve_EventType
                     ELSE '<missing event>' END AS eve_EventTypeDisconnection,
                CASE WHEN EVE2.eve_EventType IN ('Disconnected', 'Device Down')
                     THEN EVE2.eve_DateTime
                     ELSE NULL END AS eve_DateTimeDisconnection,
                CASE WHEN EVE2.eve_EventType IS NULL THEN 1 ELSE 0 END AS eve_StillConnected,
                EVE1.eve_AdditionalInfo
            FROM Events AS EVE1
            LEFT JOIN Events AS EVE2 ON EVE1.eve_PairEventRowID = EVE2.rowid
            WHERE EVE1.eve_EventType IN ('New Device', 'Connected', 'Down Reconnected')
            UNION
            SELECT
                eve_MAC,
                eve_IP,
                '<missing event>' AS eve_EventTypeConnection,
                NULL AS eve_DateTimeConnection,
                eve_EventType AS eve_EventTypeDisconnection,
                eve_DateTime AS eve_DateTimeDisconnection,
                0 AS eve_StillConnected,
                eve_AdditionalInfo
            FROM Events AS EVE1
            WHERE (eve_EventType = 'Device Down' OR eve_EventType = 'Disconnected')
              AND EVE1.eve_PairEventRowID IS NULL;",
    ),
    // Latest scan row per device and reporting plugin
    SchemaObject::view(
        "LatestDeviceScan",
        "CREATE VIEW LatestDeviceScan AS
            WITH RankedScans AS (
                SELECT
                    c.*,
                    ROW_NUMBER() OVER (
                        PARTITION BY c.scanMac, c.scanSourcePlugin
                        ORDER BY c.scanLastConnection DESC
                    ) AS rn
                FROM CurrentScan c
            )
            SELECT
                d.*,
                r.*
            FROM Devices d
            LEFT JOIN RankedScans r ON d.devMac = r.scanMac
            WHERE r.rn = 1;",
    ),
];

/// Historical data may hold exact duplicates that would make `idx_events_unique` fail.
/// Keeps the earliest row of each group, so repeated runs are no-ops.
pub const DEDUPE_EVENTS_SQL: &str = "
    DELETE FROM Events
    WHERE rowid NOT IN (
        SELECT MIN(rowid)
        FROM Events
        GROUP BY eve_MAC, eve_IP, eve_EventType, eve_DateTime
    );";

pub const INDEXES: &[SchemaObject] = &[
    // Sessions
    SchemaObject::index(
        "idx_ses_mac_date",
        "CREATE INDEX idx_ses_mac_date ON Sessions(ses_MAC, ses_DateTimeConnection, ses_DateTimeDisconnection, ses_StillConnected);",
    ),
    // Events
    SchemaObject::index(
        "idx_eve_mac_date_type",
        "CREATE INDEX idx_eve_mac_date_type ON Events(eve_MAC, eve_DateTime, eve_EventType);",
    ),
    SchemaObject::index(
        "idx_eve_alert_pending",
        "CREATE INDEX idx_eve_alert_pending ON Events(eve_PendingAlertEmail);",
    ),
    SchemaObject::index(
        "idx_eve_mac_datetime_desc",
        "CREATE INDEX idx_eve_mac_datetime_desc ON Events(eve_MAC, eve_DateTime DESC);",
    ),
    SchemaObject::index(
        "idx_eve_pairevent",
        "CREATE INDEX idx_eve_pairevent ON Events(eve_PairEventRowID);",
    ),
    SchemaObject::index(
        "idx_eve_type_date",
        "CREATE INDEX idx_eve_type_date ON Events(eve_EventType, eve_DateTime);",
    ),
    SchemaObject::index_after(
        "idx_events_unique",
        DEDUPE_EVENTS_SQL,
        "CREATE UNIQUE INDEX idx_events_unique ON Events(eve_MAC, eve_IP, eve_EventType, eve_DateTime);",
    ),
    // Devices
    SchemaObject::index("idx_dev_mac", "CREATE INDEX idx_dev_mac ON Devices(devMac);"),
    SchemaObject::index(
        "idx_dev_present",
        "CREATE INDEX idx_dev_present ON Devices(devPresentLastScan);",
    ),
    SchemaObject::index(
        "idx_dev_alertdown",
        "CREATE INDEX idx_dev_alertdown ON Devices(devAlertDown);",
    ),
    SchemaObject::index("idx_dev_isnew", "CREATE INDEX idx_dev_isnew ON Devices(devIsNew);"),
    SchemaObject::index(
        "idx_dev_isarchived",
        "CREATE INDEX idx_dev_isarchived ON Devices(devIsArchived);",
    ),
    SchemaObject::index(
        "idx_dev_favorite",
        "CREATE INDEX idx_dev_favorite ON Devices(devFavorite);",
    ),
    SchemaObject::index(
        "idx_dev_parentmac",
        "CREATE INDEX idx_dev_parentmac ON Devices(devParentMAC);",
    ),
    // Optional filter columns
    SchemaObject::index("idx_dev_site", "CREATE INDEX idx_dev_site ON Devices(devSite);"),
    SchemaObject::index("idx_dev_group", "CREATE INDEX idx_dev_group ON Devices(devGroup);"),
    SchemaObject::index("idx_dev_owner", "CREATE INDEX idx_dev_owner ON Devices(devOwner);"),
    SchemaObject::index("idx_dev_type", "CREATE INDEX idx_dev_type ON Devices(devType);"),
    SchemaObject::index(
        "idx_dev_vendor",
        "CREATE INDEX idx_dev_vendor ON Devices(devVendor);",
    ),
    SchemaObject::index(
        "idx_dev_location",
        "CREATE INDEX idx_dev_location ON Devices(devLocation);",
    ),
    // Settings
    SchemaObject::index("idx_set_key", "CREATE INDEX idx_set_key ON Settings(setKey);"),
    // Name resolution looks plugin objects up by plugin and both ids
    SchemaObject::index(
        "idx_plugins_plugin_mac_ip",
        "CREATE INDEX idx_plugins_plugin_mac_ip ON Plugins_Objects(Plugin, Object_PrimaryID, Object_SecondaryID);",
    ),
];

/// MAC normalization. The update trigger only fires when the new value still has an
/// uppercase character, which stops it from re-triggering itself.
pub const TRIGGERS: &[SchemaObject] = &[
    SchemaObject::trigger(
        "trg_lowercase_mac_insert",
        "CREATE TRIGGER trg_lowercase_mac_insert
            AFTER INSERT ON Devices
            BEGIN
                UPDATE Devices
                SET devMac = LOWER(NEW.devMac),
                    devParentMAC = LOWER(NEW.devParentMAC)
                WHERE rowid = NEW.rowid;
            END;",
    ),
    SchemaObject::trigger(
        "trg_lowercase_mac_update",
        "CREATE TRIGGER trg_lowercase_mac_update
            AFTER UPDATE OF devMac, devParentMAC ON Devices
            WHEN (NEW.devMac GLOB '*[A-Z]*') OR (NEW.devParentMAC GLOB '*[A-Z]*')
            BEGIN
                UPDATE Devices
                SET devMac = LOWER(NEW.devMac),
                    devParentMAC = LOWER(NEW.devParentMAC)
                WHERE rowid = NEW.rowid;
            END;",
    ),
];

pub struct StructuralObjects;

impl StructuralObjects {
    /// Drop and recreate every view. Returns the number rebuilt.
    pub fn ensure_views(conn: &Connection) -> Result<usize, UpkeepError> {
        Self::rebuild(conn, VIEWS)
    }

    /// Drop and recreate every index, running any pre-statement (e.g. the Events
    /// de-duplication) immediately before its index.
    pub fn ensure_indexes(conn: &Connection) -> Result<usize, UpkeepError> {
        Self::rebuild(conn, INDEXES)
    }

    /// Create missing triggers. Existing triggers are left in place.
    pub fn ensure_triggers(conn: &Connection) -> Result<usize, UpkeepError> {
        let mut created = 0;
        for trigger in TRIGGERS {
            if trigger.exists(conn)? {
                continue;
            }
            info!("[db_upgrade] Creating trigger '{}'", trigger.name);
            conn.execute_batch(trigger.create_sql)?;
            created += 1;
        }
        Ok(created)
    }

    pub fn ensure_all(conn: &Connection) -> Result<(), UpkeepError> {
        let views = Self::ensure_views(conn)?;
        let indexes = Self::ensure_indexes(conn)?;
        let triggers = Self::ensure_triggers(conn)?;
        info!(
            "[db_upgrade] Rebuilt {} views and {} indexes, created {} triggers",
            views, indexes, triggers
        );
        Ok(())
    }

    /// Name and definition of every catalog object of `kind`, sorted by name.
    pub fn catalog(conn: &Connection, kind: ObjectKind) -> Result<Vec<(String, String)>, UpkeepError> {
        let mut stmt = conn.prepare(
            "SELECT name, sql FROM sqlite_master WHERE type = ? AND sql IS NOT NULL ORDER BY name",
        )?;
        let rows = stmt
            .query_map([kind.catalog_type()], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn rebuild(conn: &Connection, objects: &[SchemaObject]) -> Result<usize, UpkeepError> {
        for object in objects {
            conn.execute_batch(&object.drop_sql())?;
            if let Some(pre_sql) = object.pre_sql {
                let removed = conn.execute(pre_sql, [])?;
                if removed > 0 {
                    info!(
                        "[db_upgrade] Removed {} rows ahead of {} {}",
                        removed, object.kind, object.name
                    );
                }
            }
            conn.execute_batch(object.create_sql)?;
            debug!("[db_upgrade] Recreated {} {}", object.kind, object.name);
        }
        Ok(objects.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::base::{CREATE_BASE_TABLES_SQL, RECREATE_TRANSIENT_TABLES_SQL};
    use pretty_assertions::assert_eq;

    fn base_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_BASE_TABLES_SQL).unwrap();
        conn.execute_batch(RECREATE_TRANSIENT_TABLES_SQL).unwrap();
        conn
    }

    fn snapshot(conn: &Connection) -> Vec<Vec<(String, String)>> {
        ObjectKind::ALL
            .iter()
            .map(|k| StructuralObjects::catalog(conn, *k).unwrap())
            .collect()
    }

    #[test]
    fn test_ensure_all_is_idempotent() {
        let conn = base_conn();
        StructuralObjects::ensure_all(&conn).unwrap();
        let first = snapshot(&conn);

        StructuralObjects::ensure_all(&conn).unwrap();
        let second = snapshot(&conn);

        assert_eq!(first, second);
        assert_eq!(first[0].len(), VIEWS.len());
        assert_eq!(first[2].len(), TRIGGERS.len());
        assert!(first[1].iter().any(|(name, _)| name == "idx_events_unique"));
    }

    #[test]
    fn test_duplicate_events_removed_before_unique_index() {
        let conn = base_conn();
        conn.execute_batch(
            "INSERT INTO Events (eve_MAC, eve_IP, eve_DateTime, eve_EventType) VALUES
                ('aa', '10.0.0.1', '2026-01-01 10:00:00', 'Connected'),
                ('aa', '10.0.0.1', '2026-01-01 10:00:00', 'Connected'),
                ('aa', '10.0.0.1', '2026-01-01 10:00:00', 'Connected'),
                ('bb', '10.0.0.2', '2026-01-01 10:00:00', 'Connected');",
        )
        .unwrap();

        StructuralObjects::ensure_indexes(&conn).unwrap();

        let rowids: Vec<i64> = conn
            .prepare("SELECT rowid FROM Events ORDER BY rowid")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rowids, vec![1, 4]);

        // The unique index now rejects a new duplicate
        let dup = conn.execute(
            "INSERT INTO Events (eve_MAC, eve_IP, eve_DateTime, eve_EventType)
             VALUES ('bb', '10.0.0.2', '2026-01-01 10:00:00', 'Connected')",
            [],
        );
        assert!(dup.is_err());

        // Running again keeps the same rows
        StructuralObjects::ensure_indexes(&conn).unwrap();
        let count: i64 = conn.query_row("SELECT count(*) FROM Events", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_existing_trigger_is_not_replaced() {
        let conn = base_conn();
        conn.execute_batch(
            "CREATE TRIGGER trg_lowercase_mac_insert AFTER INSERT ON Devices BEGIN SELECT 1; END;",
        )
        .unwrap();

        let created = StructuralObjects::ensure_triggers(&conn).unwrap();
        assert_eq!(created, 1);

        let triggers = StructuralObjects::catalog(&conn, ObjectKind::Trigger).unwrap();
        let insert_sql = &triggers
            .iter()
            .find(|(name, _)| name == "trg_lowercase_mac_insert")
            .unwrap()
            .1;
        assert!(insert_sql.contains("SELECT 1"));
    }

    #[test]
    fn test_mac_triggers_lowercase_on_insert_and_update() {
        let conn = base_conn();
        StructuralObjects::ensure_triggers(&conn).unwrap();

        conn.execute(
            "INSERT INTO Devices (devMac, devParentMAC) VALUES ('AA:BB:CC:DD:EE:FF', 'Internet')",
            [],
        )
        .unwrap();
        let (mac, parent): (String, String) = conn
            .query_row("SELECT devMac, devParentMAC FROM Devices", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(parent, "internet");

        conn.execute("UPDATE Devices SET devParentMAC = '11:22:33:AA:BB:CC'", [])
            .unwrap();
        let parent: String = conn
            .query_row("SELECT devParentMAC FROM Devices", [], |r| r.get(0))
            .unwrap();
        assert_eq!(parent, "11:22:33:aa:bb:cc");
    }

    #[test]
    fn test_device_join_views() {
        let conn = base_conn();
        StructuralObjects::ensure_views(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO Devices (devMac, devName) VALUES ('aa', 'Laptop'), ('bb', 'Phone');
             INSERT INTO CurrentScan (scanMac, scanLastIP) VALUES ('aa', '10.0.0.7');
             INSERT INTO Events (eve_MAC, eve_IP, eve_DateTime, eve_EventType) VALUES
                ('aa', '10.0.0.1', '2026-01-01 09:00:00', 'Connected'),
                ('aa', '10.0.0.1', '2026-01-01 10:00:00', 'Disconnected'),
                ('bb', '10.0.0.2', '2026-01-01 11:00:00', 'Connected'),
                ('zz', '10.0.0.3', '2026-01-01 08:00:00', 'Connected');
             INSERT INTO Sessions (ses_MAC, ses_DateTimeConnection) VALUES
                ('bb', '2026-01-01 11:00:00'),
                ('zz', '2026-01-01 08:00:00');",
        )
        .unwrap();

        let pairs = |sql: &str| -> Vec<(String, Option<String>)> {
            let mut stmt = conn.prepare(sql).unwrap();
            let rows = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();
            rows
        };

        // Events for unknown devices are kept with empty device columns
        assert_eq!(
            pairs("SELECT eve_MAC, devName FROM Events_Devices ORDER BY eve_DateTime"),
            vec![
                ("zz".to_string(), None),
                ("aa".to_string(), Some("Laptop".to_string())),
                ("aa".to_string(), Some("Laptop".to_string())),
                ("bb".to_string(), Some("Phone".to_string())),
            ]
        );
        assert_eq!(
            pairs("SELECT ses_MAC, devName FROM Sessions_Devices ORDER BY ses_MAC"),
            vec![
                ("bb".to_string(), Some("Phone".to_string())),
                ("zz".to_string(), None),
            ]
        );

        // Only devices in the current scan, and only their newest event
        let latest: Vec<(String, String, String, String)> = {
            let mut stmt = conn
                .prepare("SELECT eve_MAC, eve_EventType, devName, scanLastIP FROM LatestEventsPerMAC")
                .unwrap();
            let rows = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();
            rows
        };
        assert_eq!(
            latest,
            vec![(
                "aa".to_string(),
                "Disconnected".to_string(),
                "Laptop".to_string(),
                "10.0.0.7".to_string()
            )]
        );
    }

    #[test]
    fn test_sessions_view_pairs_events() {
        let conn = base_conn();
        StructuralObjects::ensure_views(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO Events (rowid, eve_MAC, eve_IP, eve_DateTime, eve_EventType, eve_PairEventRowID) VALUES
                (1, 'aa', '10.0.0.1', '2026-01-01 10:00:00', 'Disconnected', NULL),
                (2, 'aa', '10.0.0.1', '2026-01-01 09:00:00', 'Connected', 1),
                (3, 'bb', '10.0.0.2', '2026-01-01 11:00:00', 'Connected', NULL),
                (4, 'cc', '10.0.0.3', '2026-01-01 12:00:00', 'Device Down', NULL);",
        )
        .unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT eve_MAC, eve_EventTypeConnection, eve_EventTypeDisconnection, eve_StillConnected
                 FROM Convert_Events_to_Sessions ORDER BY eve_MAC, eve_EventTypeConnection",
            )
            .unwrap();
        let rows: Vec<(String, String, Option<String>, i64)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(
            rows,
            vec![
                ("aa".into(), "<missing event>".into(), Some("Disconnected".into()), 0),
                ("aa".into(), "Connected".into(), Some("Disconnected".into()), 0),
                ("bb".into(), "Connected".into(), None, 1),
                ("cc".into(), "<missing event>".into(), Some("Device Down".into()), 0),
            ]
        );
    }

    #[test]
    fn test_latest_device_scan_picks_newest_per_plugin() {
        let conn = base_conn();
        StructuralObjects::ensure_views(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO Devices (devMac) VALUES ('aa');
             INSERT INTO CurrentScan (scanMac, scanLastIP, scanSourcePlugin, scanLastConnection) VALUES
                ('aa', '10.0.0.1', 'ARPSCAN', '2026-01-01 10:00:00'),
                ('aa', '10.0.0.9', 'ARPSCAN', '2026-01-01 11:00:00'),
                ('aa', '10.0.0.5', 'NMAP', '2026-01-01 09:00:00');",
        )
        .unwrap();

        let mut stmt = conn
            .prepare("SELECT scanSourcePlugin, scanLastIP FROM LatestDeviceScan ORDER BY scanSourcePlugin")
            .unwrap();
        let rows: Vec<(String, String)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            rows,
            vec![
                ("ARPSCAN".to_string(), "10.0.0.9".to_string()),
                ("NMAP".to_string(), "10.0.0.5".to_string()),
            ]
        );
    }
}
