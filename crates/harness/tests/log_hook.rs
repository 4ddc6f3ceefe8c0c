//! The log hook is a process-wide singleton; these tests run one at a time.

use parking_lot::Mutex;
use stepgate_core::{LogEvent, Subscriber};
use stepgate_harness::init_tracing;
use stepgate_storage::{Connection, log_hook};

static SERIAL: Mutex<()> = parking_lot::const_mutex(());

const SQLITE_ERROR: i32 = 1;

fn syntax_errors(events: &crossbeam_channel::Receiver<LogEvent>) -> Vec<LogEvent> {
    events
        .try_iter()
        .filter(|e| e.message.contains("syntax error"))
        .collect()
}

#[test]
fn engine_diagnostics_reach_subscriber() -> Result<(), Box<dyn std::error::Error>> {
    let _serial = SERIAL.lock();
    init_tracing();
    let (subscriber, events) = Subscriber::channel();
    let id = subscriber.id();
    log_hook::set_log_hook(subscriber)?;
    assert_eq!(log_hook::log_subscriber(), Some(id));

    let conn = Connection::open_in_memory()?;
    assert!(conn.execute("SELEC 1").is_err());

    let logged = syntax_errors(&events);
    assert!(!logged.is_empty());
    assert!(logged.iter().all(|e| e.code & 0xff == SQLITE_ERROR));

    log_hook::clear_log_hook()?;
    Ok(())
}

#[test]
fn hook_is_shared_across_connections() -> Result<(), Box<dyn std::error::Error>> {
    let _serial = SERIAL.lock();
    let (subscriber, events) = Subscriber::channel();
    log_hook::set_log_hook(subscriber)?;

    let first = Connection::open_in_memory()?;
    let second = Connection::open_in_memory()?;
    assert!(first.execute("SELEC 1").is_err());
    assert!(second.execute("SELEC 2").is_err());
    assert!(syntax_errors(&events).len() >= 2);

    log_hook::clear_log_hook()?;
    Ok(())
}

#[test]
fn setting_again_replaces_subscriber() -> Result<(), Box<dyn std::error::Error>> {
    let _serial = SERIAL.lock();
    let (old, old_events) = Subscriber::channel();
    let (new, new_events) = Subscriber::channel();
    let new_id = new.id();
    log_hook::set_log_hook(old)?;
    log_hook::set_log_hook(new)?;
    assert_eq!(log_hook::log_subscriber(), Some(new_id));

    let conn = Connection::open_in_memory()?;
    assert!(conn.execute("SELEC 1").is_err());
    assert!(syntax_errors(&old_events).is_empty());
    assert!(!syntax_errors(&new_events).is_empty());

    log_hook::clear_log_hook()?;
    Ok(())
}

#[test]
fn unreachable_subscriber_clears_hook() -> Result<(), Box<dyn std::error::Error>> {
    let _serial = SERIAL.lock();
    init_tracing();
    let (subscriber, events) = Subscriber::<LogEvent>::channel();
    log_hook::set_log_hook(subscriber)?;
    drop(events);

    let conn = Connection::open_in_memory()?;
    assert!(conn.execute("SELEC 1").is_err());
    assert!(!log_hook::has_log_hook());

    // Later diagnostics go nowhere and do not disturb the engine.
    assert!(conn.execute("SELEC 2").is_err());
    conn.execute("SELECT 1")?;
    Ok(())
}

#[test]
fn teardown_drops_subscriber() -> Result<(), Box<dyn std::error::Error>> {
    let _serial = SERIAL.lock();
    let (subscriber, events) = Subscriber::channel();
    log_hook::set_log_hook(subscriber)?;

    log_hook::teardown()?;
    assert!(!log_hook::has_log_hook());

    let conn = Connection::open_in_memory()?;
    assert!(conn.execute("SELEC 1").is_err());
    assert!(syntax_errors(&events).is_empty());

    // The hook can be set up again afterwards.
    let (subscriber, events) = Subscriber::channel();
    log_hook::set_log_hook(subscriber)?;
    assert!(conn.execute("SELEC 3").is_err());
    assert!(!syntax_errors(&events).is_empty());
    log_hook::teardown()?;
    Ok(())
}
