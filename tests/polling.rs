use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use httpmock::prelude::*;

use optiflag::{Attributes, ClientConfig, Error, NotificationType, UserContext, UserEvent};

fn datafile_with_revision(revision: &str) -> String {
    std::fs::read_to_string("tests/data/scenarios.json")
        .unwrap()
        .replace("\"revision\": \"1\"", &format!("\"revision\": \"{revision}\""))
}

#[test]
fn installs_new_revisions_only() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = MockServer::start();
    let mut first = server.mock(|when, then| {
        when.method(GET).path("/datafiles/sdk-key.json");
        then.status(200).body(datafile_with_revision("1"));
    });

    let client = ClientConfig::from_sdk_key("sdk-key")
        .datafile_url_template(server.url("/datafiles/{sdk_key}.json"))
        .polling_interval(Duration::from_millis(20))
        .poll_jitter(Duration::ZERO)
        .to_client();
    client.wait_for_configuration().unwrap();
    assert_eq!(client.get_project_config().unwrap().revision(), "1");

    let updates = Arc::new(AtomicUsize::new(0));
    {
        let updates = updates.clone();
        client
            .notification_center()
            .add_handler(NotificationType::ProjectConfigUpdate, move |_| {
                updates.fetch_add(1, Ordering::SeqCst);
            });
    }

    let seen = first.hits();
    while first.hits() < seen + 3 {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(updates.load(Ordering::SeqCst), 0);
    first.delete();

    let second = server.mock(|when, then| {
        when.method(GET).path("/datafiles/sdk-key.json");
        then.status(200).body(datafile_with_revision("2"));
    });
    while second.hits() < 3 {
        std::thread::sleep(Duration::from_millis(10));
    }
    client.close();

    assert_eq!(client.get_project_config().unwrap().revision(), "2");
    assert_eq!(updates.load(Ordering::SeqCst), 1);
}

#[test]
fn forbidden_is_reported() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/datafiles/bad-key.json");
        then.status(403);
    });

    let client = ClientConfig::from_sdk_key("bad-key")
        .datafile_url_template(server.url("/datafiles/{sdk_key}.json"))
        .polling_interval(Duration::ZERO)
        .to_client();
    assert!(matches!(client.wait_for_configuration(), Err(Error::Forbidden)));
    assert!(matches!(client.last_error(), Some(Error::Forbidden)));

    let (decision, err) =
        client.decide_with_error(&UserContext::new("u1", Attributes::new()), "ab_flag", &[]);
    assert!(matches!(err, Some(Error::Forbidden)));
    assert!(!decision.enabled);
    assert_eq!(
        decision.reasons,
        ["forbidden (403) while fetching datafile, sdk_key is likely invalid"]
    );
}

#[test]
fn authenticated_datafile() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/auth/sdk-key.json")
            .header("Authorization", "Bearer token");
        then.status(200).body(datafile_with_revision("5"));
    });

    let client = ClientConfig::from_sdk_key("sdk-key")
        .datafile_url_template(server.url("/auth/{sdk_key}.json"))
        .access_token("token")
        .polling_interval(Duration::ZERO)
        .to_client();
    client.wait_for_configuration().unwrap();
    assert_eq!(client.get_project_config().unwrap().revision(), "5");
    mock.assert();
}

/// Variation keys carry the revision so every decision can be traced to one snapshot.
fn tagged_datafile(revision: u32) -> String {
    datafile_with_revision(&revision.to_string())
        .replace(r#""key": "var_a""#, &format!(r#""key": "var_a_r{revision}""#))
        .replace(r#""key": "var_b""#, &format!(r#""key": "var_b_r{revision}""#))
}

#[test]
fn decisions_see_one_revision_while_polling_swaps() {
    let server = MockServer::start();
    let mut current = server.mock(|when, then| {
        when.method(GET).path("/datafiles/sdk-key.json");
        then.status(200).body(tagged_datafile(1));
    });

    let impressions = Arc::new(Mutex::new(Vec::new()));
    let client = {
        let impressions = impressions.clone();
        ClientConfig::from_sdk_key("sdk-key")
            .datafile_url_template(server.url("/datafiles/{sdk_key}.json"))
            .polling_interval(Duration::from_millis(1))
            .poll_jitter(Duration::ZERO)
            .event_processor(move |event: UserEvent| {
                if let UserEvent::Impression(impression) = event {
                    impressions.lock().unwrap().push((
                        impression.context.revision,
                        impression.variation_key,
                    ));
                }
            })
            .to_client()
    };
    client.wait_for_configuration().unwrap();

    let mut user = UserContext::new("u1", Attributes::new());
    user.set_attribute("age", 30.0);
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    let decision = client.decide(&user, "ab_flag", &[]);
                    let key = decision.variation_key.unwrap();
                    assert!(key.starts_with("var_b_r"), "unexpected variation {key}");
                }
            });
        }

        for revision in 2..=5u32 {
            current.delete();
            current = server.mock(|when, then| {
                when.method(GET).path("/datafiles/sdk-key.json");
                then.status(200).body(tagged_datafile(revision));
            });
            while client.get_project_config().unwrap().revision() != revision.to_string() {
                std::thread::sleep(Duration::from_millis(1));
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        done.store(true, Ordering::SeqCst);
    });
    client.close();

    let impressions = impressions.lock().unwrap();
    assert!(!impressions.is_empty());
    for (revision, variation_key) in impressions.iter() {
        assert_eq!(variation_key, &format!("var_b_r{revision}"));
    }
    let revisions: HashSet<_> = impressions.iter().map(|(revision, _)| revision).collect();
    assert!(revisions.len() > 1, "saw revisions {revisions:?}");
}
