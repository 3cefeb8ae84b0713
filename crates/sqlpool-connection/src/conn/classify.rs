//! Classification of errors that leave a connection unusable

use sqlpool_core::DbError;

/// Server error codes after which a connection cannot be trusted
///
/// Out-of-resource conditions, lost or aborted connections, access and
/// handshake failures, server shutdown, failed replication and character set
/// conversion errors. Every client-side code (2000 and above) is fatal as
/// well and is not listed.
pub const FATAL_SERVER_CODES: &[u16] = &[
    1021, // disk full
    1037, // out of memory
    1041, // out of memory
    1042, // can't get hostname
    1043, // bad handshake
    1044, // database access denied
    1045, // access denied
    1053, // server shutdown
    1077, // normal shutdown
    1078, // got signal
    1079, // shutdown complete
    1080, // forcing close of thread
    1081, // can't create IP socket
    1114, // table is full
    1119, // stack overrun
    1152, // aborted connection
    1153, // packet too large
    1154, // read error from pipe
    1155, // fcntl error
    1156, // packets out of order
    1157, // uncompress error
    1158, // read error
    1159, // read timeout
    1160, // write error
    1161, // write timeout
    1188, // master reported error
    1189, // net error reading from master
    1190, // net error writing to master
    1194, // crashed table
    1195, // crashed table, repair failed
    1197, // transaction cache full
    1203, // too many user connections
    1218, // error connecting to master
    1219, // error running query on master
    1436, // thread stack overrun
    1459, // table needs upgrade
    1534, // binlog row logging failed
    1535, // binlog row wrong table definition
    1547, // column count doesn't match
    1548, // column count doesn't match, table corrupt
    1610, // slave corrupt event
    1705, // statement cache size exceeded
];

/// Whether a server or client error code leaves the connection unusable
pub fn is_fatal_server_code(code: u16) -> bool {
    code >= 2000 || FATAL_SERVER_CODES.contains(&code)
}

/// Whether an error should cause the connection it came from to be destroyed
///
/// Driver errors are fatal according to their code. End of stream is part of
/// normal row scanning and never fatal. Every other error, including request
/// timeouts and I/O failures, is fatal.
pub fn is_fatal(err: &DbError) -> bool {
    match err {
        DbError::Driver { code, .. } => is_fatal_server_code(*code),
        DbError::EndOfStream => false,
        _ => true,
    }
}
