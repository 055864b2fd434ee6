/// Tables the monitoring service relies on. Every statement is `IF NOT EXISTS`, so
/// running this against an existing install never touches its data; columns missing
/// from older installs are added afterwards by the column verifier.
pub const CREATE_BASE_TABLES_SQL: &str = r#"
-- Network devices, one row per MAC address
CREATE TABLE IF NOT EXISTS Devices (
    devMac                  STRING(50) PRIMARY KEY NOT NULL COLLATE NOCASE,
    devName                 STRING(50) DEFAULT '(unknown)',
    devOwner                STRING(30) DEFAULT '(unknown)',
    devType                 STRING(30),
    devVendor               STRING(250),
    devFavorite             BOOLEAN DEFAULT 0,
    devGroup                STRING(10),
    devComments             TEXT,
    devFirstConnection      DATE,
    devLastConnection       DATE,
    devLastIP               STRING(50) COLLATE NOCASE,
    devFQDN                 TEXT,
    devPrimaryIPv4          TEXT,
    devPrimaryIPv6          TEXT,
    devVlan                 TEXT,
    devForceStatus          TEXT,
    devStaticIP             BOOLEAN DEFAULT 0,
    devScan                 INTEGER DEFAULT 1,
    devLogEvents            BOOLEAN DEFAULT 1,
    devAlertEvents          BOOLEAN DEFAULT 1,
    devAlertDown            BOOLEAN DEFAULT 0,
    devSkipRepeated         INTEGER DEFAULT 0,
    devLastNotification     DATE,
    devPresentLastScan      BOOLEAN DEFAULT 0,
    devIsNew                BOOLEAN DEFAULT 1,
    devLocation             STRING(250) COLLATE NOCASE,
    devIsArchived           BOOLEAN DEFAULT 0,
    devParentMAC            TEXT,
    devParentPort           INTEGER,
    devParentRelType        TEXT,
    devReqNicsOnline        INTEGER,
    devIcon                 TEXT,
    devGUID                 TEXT,
    devSite                 TEXT,
    devSSID                 TEXT,
    devSyncHubNode          TEXT,
    devSourcePlugin         TEXT,
    devMacSource            TEXT,
    devNameSource           TEXT,
    devFQDNSource           TEXT,
    devLastIPSource         TEXT,
    devVendorSource         TEXT,
    devSSIDSource           TEXT,
    devParentMACSource      TEXT,
    devParentPortSource     TEXT,
    devParentRelTypeSource  TEXT,
    devVlanSource           TEXT,
    devCustomProps          TEXT
);

-- Device lifecycle events; disconnects point at their connect via eve_PairEventRowID
CREATE TABLE IF NOT EXISTS Events (
    eve_MAC                 STRING(50) NOT NULL COLLATE NOCASE,
    eve_IP                  STRING(50) NOT NULL COLLATE NOCASE,
    eve_DateTime            DATETIME NOT NULL,
    eve_EventType           STRING(30) NOT NULL COLLATE NOCASE,
    eve_AdditionalInfo      STRING(250) DEFAULT '',
    eve_PendingAlertEmail   BOOLEAN NOT NULL DEFAULT 1,
    eve_PairEventRowID      INTEGER
);

CREATE TABLE IF NOT EXISTS Sessions (
    ses_MAC                     STRING(50) COLLATE NOCASE,
    ses_IP                      STRING(50) COLLATE NOCASE,
    ses_EventTypeConnection     STRING(30) COLLATE NOCASE,
    ses_DateTimeConnection      DATETIME,
    ses_EventTypeDisconnection  STRING(30) COLLATE NOCASE,
    ses_DateTimeDisconnection   DATETIME,
    ses_StillConnected          BOOLEAN,
    ses_AdditionalInfo          TEXT
);

-- Rolling presence metrics, one row per scan
CREATE TABLE IF NOT EXISTS Online_History (
    "Index"             INTEGER,
    Scan_Date           TEXT,
    Online_Devices      INTEGER,
    Down_Devices        INTEGER,
    All_Devices         INTEGER,
    Archived_Devices    INTEGER,
    Offline_Devices     INTEGER,
    PRIMARY KEY("Index" AUTOINCREMENT)
);

CREATE TABLE IF NOT EXISTS Settings (
    setKey              TEXT,
    setName             TEXT,
    setDescription      TEXT,
    setType             TEXT,
    setOptions          TEXT,
    setGroup            TEXT,
    setValue            TEXT,
    setEvents           TEXT,
    setOverriddenByEnv  INTEGER
);

-- Current plugin state
CREATE TABLE IF NOT EXISTS Plugins_Objects (
    "Index"             INTEGER,
    Plugin              TEXT NOT NULL,
    Object_PrimaryID    TEXT NOT NULL,
    Object_SecondaryID  TEXT NOT NULL,
    DateTimeCreated     TEXT NOT NULL,
    DateTimeChanged     TEXT NOT NULL,
    Watched_Value1      TEXT NOT NULL,
    Watched_Value2      TEXT NOT NULL,
    Watched_Value3      TEXT NOT NULL,
    Watched_Value4      TEXT NOT NULL,
    Status              TEXT NOT NULL,
    Extra               TEXT NOT NULL,
    UserData            TEXT NOT NULL,
    ForeignKey          TEXT NOT NULL,
    SyncHubNodeName     TEXT,
    HelpVal1            TEXT,
    HelpVal2            TEXT,
    HelpVal3            TEXT,
    HelpVal4            TEXT,
    ObjectGUID          TEXT,
    PRIMARY KEY("Index" AUTOINCREMENT)
);

-- Plugin execution results
CREATE TABLE IF NOT EXISTS Plugins_Events (
    "Index"             INTEGER,
    Plugin              TEXT NOT NULL,
    Object_PrimaryID    TEXT NOT NULL,
    Object_SecondaryID  TEXT NOT NULL,
    DateTimeCreated     TEXT NOT NULL,
    DateTimeChanged     TEXT NOT NULL,
    Watched_Value1      TEXT NOT NULL,
    Watched_Value2      TEXT NOT NULL,
    Watched_Value3      TEXT NOT NULL,
    Watched_Value4      TEXT NOT NULL,
    Status              TEXT NOT NULL,
    Extra               TEXT NOT NULL,
    UserData            TEXT NOT NULL,
    ForeignKey          TEXT NOT NULL,
    SyncHubNodeName     TEXT,
    HelpVal1            TEXT,
    HelpVal2            TEXT,
    HelpVal3            TEXT,
    HelpVal4            TEXT,
    PRIMARY KEY("Index" AUTOINCREMENT)
);

-- Plugin execution history
CREATE TABLE IF NOT EXISTS Plugins_History (
    "Index"             INTEGER,
    Plugin              TEXT NOT NULL,
    Object_PrimaryID    TEXT NOT NULL,
    Object_SecondaryID  TEXT NOT NULL,
    DateTimeCreated     TEXT NOT NULL,
    DateTimeChanged     TEXT NOT NULL,
    Watched_Value1      TEXT NOT NULL,
    Watched_Value2      TEXT NOT NULL,
    Watched_Value3      TEXT NOT NULL,
    Watched_Value4      TEXT NOT NULL,
    Status              TEXT NOT NULL,
    Extra               TEXT NOT NULL,
    UserData            TEXT NOT NULL,
    ForeignKey          TEXT NOT NULL,
    SyncHubNodeName     TEXT,
    HelpVal1            TEXT,
    HelpVal2            TEXT,
    HelpVal3            TEXT,
    HelpVal4            TEXT,
    PRIMARY KEY("Index" AUTOINCREMENT)
);

-- Sent notification reports
CREATE TABLE IF NOT EXISTS Notifications (
    "Index"             INTEGER,
    GUID                TEXT UNIQUE,
    DateTimeCreated     TEXT,
    DateTimePushed      TEXT,
    Status              TEXT,
    JSON                TEXT,
    Text                TEXT,
    HTML                TEXT,
    PublishedVia        TEXT,
    Extra               TEXT,
    PRIMARY KEY("Index" AUTOINCREMENT)
);

-- Application workflow events
CREATE TABLE IF NOT EXISTS AppEvents (
    "Index"             INTEGER,
    GUID                TEXT UNIQUE,
    AppEventProcessed   BOOLEAN DEFAULT 0,
    DateTimeCreated     TEXT,
    ObjectType          TEXT,
    ObjectGUID          TEXT,
    ObjectPlugin        TEXT,
    ObjectPrimaryID     TEXT,
    ObjectSecondaryID   TEXT,
    ObjectForeignKey    TEXT,
    ObjectIndex         TEXT,
    ObjectIsNew         BOOLEAN,
    ObjectIsArchived    BOOLEAN,
    ObjectStatusColumn  TEXT,
    ObjectStatus        TEXT,
    AppEventType        TEXT,
    Helper1             TEXT,
    Helper2             TEXT,
    Helper3             TEXT,
    Extra               TEXT,
    PRIMARY KEY("Index" AUTOINCREMENT)
);
"#;

/// Tables holding no durable data. They are dropped and recreated on every startup
/// so their definition always matches this build.
pub const RECREATE_TRANSIENT_TABLES_SQL: &str = r#"
-- Per-scan staging area filled by the scanning plugins
DROP TABLE IF EXISTS CurrentScan;
CREATE TABLE CurrentScan (
    scanMac             STRING(50) NOT NULL COLLATE NOCASE,
    scanLastIP          STRING(50) NOT NULL COLLATE NOCASE,
    scanVendor          STRING(250),
    scanSourcePlugin    STRING(10),
    scanName            STRING(250),
    scanLastQuery       STRING(250),
    scanLastConnection  STRING(250),
    scanSyncHubNode     STRING(50),
    scanSite            STRING(250),
    scanSSID            STRING(250),
    scanVlan            STRING(250),
    scanParentMAC       STRING(250),
    scanParentPort      STRING(250),
    scanFQDN            STRING(250),
    scanType            STRING(250)
);

DROP TABLE IF EXISTS Parameters;
CREATE TABLE Parameters (
    par_ID      TEXT PRIMARY KEY,
    par_Value   TEXT
);

-- Regenerated by the plugins on load
DROP TABLE IF EXISTS Plugins_Language_Strings;
CREATE TABLE Plugins_Language_Strings (
    "Index"         INTEGER,
    Language_Code   TEXT NOT NULL,
    String_Key      TEXT NOT NULL,
    String_Value    TEXT NOT NULL,
    Extra           TEXT NOT NULL,
    PRIMARY KEY("Index" AUTOINCREMENT)
);
"#;
