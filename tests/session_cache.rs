mod common;

use std::{
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use pretty_assertions::assert_eq;
use relaymail::{transport::smtp::Deadline, Envelope, SmtpClient};

use crate::common::{MockServer, Reply};

fn envelope() -> Envelope {
    Envelope::new("a@x.com", "Ping", "ping")
}

#[test]
fn session_is_reused() {
    let server = MockServer::start(&["8BITMIME"]);
    let client = SmtpClient::new(server.config().build().unwrap());

    let first = client.session().unwrap();
    let second = client.session().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.id(), second.id());
    assert_eq!(first.server_info().name(), "mock.test");

    client.send(&envelope()).unwrap();
    client.send(&envelope()).unwrap();
    assert_eq!(server.connections(), 1);

    let commands = server.commands(0);
    assert_eq!(commands.iter().filter(|l| l.starts_with("EHLO")).count(), 1);
    assert_eq!(commands.iter().filter(|l| l.starts_with("MAIL")).count(), 2);
}

#[test]
fn clones_share_the_session() {
    let server = MockServer::start(&[]);
    let client = SmtpClient::new(server.config().build().unwrap());
    let other = client.clone();

    let first = client.session().unwrap();
    let second = other.session().unwrap();
    assert_eq!(first.id(), second.id());
    assert_eq!(server.connections(), 1);
}

#[test]
fn expired_session_is_replaced() {
    let server = MockServer::start(&[]);
    let client = SmtpClient::new(
        server
            .config()
            .max_lifetime(Duration::from_millis(200))
            .build()
            .unwrap(),
    );

    let first = client.session().unwrap();
    client.send(&envelope()).unwrap();
    thread::sleep(Duration::from_millis(300));

    client.send(&envelope()).unwrap();
    let second = client.session().unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(server.connections(), 2);

    // the replaced connection is closed politely
    assert!(server.wait_for(0, "QUIT"));
    assert!(first.is_broken());
}

#[test]
fn zero_lifetime_reconnects_every_time() {
    let server = MockServer::start(&[]);
    let client = SmtpClient::new(
        server
            .config()
            .max_lifetime(Duration::ZERO)
            .build()
            .unwrap(),
    );

    client.send(&envelope()).unwrap();
    client.send(&envelope()).unwrap();
    assert_eq!(server.connections(), 2);
}

#[test]
fn concurrent_callers_share_one_dial() {
    // a slow greeting keeps the first attempt in flight while the others
    // arrive
    let server = MockServer::start_with(&[], Duration::from_millis(300), |_| None);
    let client = SmtpClient::new(server.config().build().unwrap());

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                client.session().unwrap().id()
            })
        })
        .collect();

    let ids: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(server.connections(), 1);
}

#[test]
fn concurrent_sends_are_serialized() {
    let server = MockServer::start(&[]);
    let client = SmtpClient::new(server.config().build().unwrap());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let client = client.clone();
            thread::spawn(move || {
                client
                    .send(&Envelope::new(format!("user{i}@x.com"), "Hi", "body"))
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(server.connections(), 1);
    assert_eq!(server.messages().len(), 4);
    let commands = server.commands(0);
    // every MAIL is followed by its own RCPT and DATA
    for (i, line) in commands.iter().enumerate() {
        if line.starts_with("MAIL") {
            assert!(commands[i + 1].starts_with("RCPT"));
            assert_eq!(commands[i + 2], "DATA");
        }
    }
}

#[test]
fn concurrent_callers_share_a_failure() {
    let server = MockServer::start_with(&[], Duration::from_millis(300), |line| {
        line.starts_with("EHLO")
            .then(|| Reply::Send("554 5.7.1 Not today\r\n".to_owned()))
    });
    let client = SmtpClient::new(server.config().build().unwrap());

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                client.session().unwrap_err()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().is_permanent());
    }
    assert_eq!(server.connections(), 1);
}

#[test]
fn waiter_outlives_a_builder_that_ran_out_of_time() {
    let server = MockServer::start_with(&[], Duration::from_millis(600), |_| None);
    let client = SmtpClient::new(server.config().build().unwrap());

    let impatient = {
        let client = client.clone();
        thread::spawn(move || {
            client
                .session_with(&Deadline::after(Duration::from_millis(150)))
                .unwrap_err()
        })
    };
    thread::sleep(Duration::from_millis(50));

    // joins the short attempt, then dials again once it is given up
    let session = client.session().unwrap();
    assert_eq!(session.server_info().name(), "mock.test");

    let err = impatient.join().unwrap();
    assert!(err.is_cancelled() || err.is_timeout(), "{err}");
    assert_eq!(server.connections(), 2);
}

#[test]
fn close_sends_quit() {
    let server = MockServer::start(&[]);
    let client = SmtpClient::new(server.config().build().unwrap());

    let session = client.session().unwrap();
    client.close();
    assert!(session.is_broken());
    assert_eq!(server.commands(0), vec!["EHLO client.test", "QUIT"]);

    // the next send opens a new session
    client.send(&envelope()).unwrap();
    assert_eq!(server.connections(), 2);
}

#[test]
fn close_without_session_does_nothing() {
    let server = MockServer::start(&[]);
    let client = SmtpClient::new(server.config().build().unwrap());
    client.close();
    client.close();
    assert_eq!(server.connections(), 0);
}

#[test]
fn dropping_the_client_sends_quit() {
    let server = MockServer::start(&[]);
    let client = SmtpClient::new(server.config().build().unwrap());
    client.send(&envelope()).unwrap();
    drop(client);
    assert!(server.wait_for(0, "QUIT"));
}

#[test]
fn dropped_connection_is_replaced() {
    let server = MockServer::start_with(&[], Duration::ZERO, |line| {
        (line == "NOOP").then(|| Reply::Close("421 4.4.2 Timeout\r\n".to_owned()))
    });
    let client = SmtpClient::new(server.config().build().unwrap());

    let first = client.session().unwrap();
    assert!(!client.test_connection().unwrap());
    assert!(first.is_broken());

    client.send(&envelope()).unwrap();
    assert_eq!(server.connections(), 2);
}
