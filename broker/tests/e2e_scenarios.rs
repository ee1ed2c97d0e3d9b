//! The six end-to-end scenarios a careful implementer would check by
//! hand, turned into executable assertions.

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::{FakeTransport, engine_with_account, settle};
use msgset_broker::reply;
use msgset_types::{
    ack::AckKind,
    config::{AckPolicy, MsgSetConfig, ObservableConfig, ReplayPolicy, RetentionPolicy, StartPolicy},
    subject::Subject,
};
use time::OffsetDateTime;

fn msgset_cfg(subjects: &[&str], retention: RetentionPolicy) -> MsgSetConfig {
    MsgSetConfig {
        subjects: subjects.iter().map(|s| Subject::new(*s).unwrap()).collect(),
        retention,
        ..Default::default()
    }
}

/// Scenario 1: basic publish/ack.
#[tokio::test]
async fn basic_publish_ack() {
    let transport = FakeTransport::new();
    let (engine, account) = engine_with_account(transport.clone());
    let msgset_name = "foo".parse().unwrap();
    engine
        .create_msgset(&account, msgset_name, msgset_cfg(&["foo.*"], RetentionPolicy::Stream))
        .unwrap();

    for i in 0..50u32 {
        engine
            .publish(
                &account,
                "foo.bar",
                Some(&format!("inbox.{i}")),
                Bytes::from(format!("msg{i}")),
                OffsetDateTime::now_utc(),
            )
            .await;
    }

    let delivered = transport.drain();
    let oks: Vec<_> = delivered.iter().filter(|d| d.payload.as_ref() == b"+OK").collect();
    assert_eq!(oks.len(), 50);

    let stats = engine.stats_msgset(&account, &"foo".parse().unwrap()).unwrap();
    assert_eq!(stats.msgs, 50);
}

/// Scenario 2: work-queue ack-wait redelivery.
#[tokio::test]
async fn workqueue_ack_wait_redelivery() {
    let transport = FakeTransport::new();
    let (engine, account) = engine_with_account(transport.clone());
    let msgset_name = "MY_WQ".parse().unwrap();
    engine
        .create_msgset(&account, msgset_name, msgset_cfg(&["wq.*"], RetentionPolicy::WorkQueue))
        .unwrap();

    for i in 0..100u32 {
        engine
            .publish(&account, "wq.msgs", None, Bytes::from(format!("m{i}")), OffsetDateTime::now_utc())
            .await;
    }

    let msgset_name: msgset_types::names::MsgSetName = "MY_WQ".parse().unwrap();
    let observable_name: msgset_types::names::ObservableName = "consumer".parse().unwrap();
    engine
        .add_observable(
            &account,
            &msgset_name,
            observable_name.clone(),
            ObservableConfig {
                ack_policy: AckPolicy::Explicit,
                ack_wait: Duration::from_millis(100),
                start: StartPolicy::All,
                ..Default::default()
            },
        )
        .unwrap();

    for i in 0..100u32 {
        engine
            .handle_pull_request(&account, &msgset_name, &observable_name, format!("inbox1.{i}"), b"1")
            .await
            .unwrap();
    }
    let first_round = transport.drain();
    assert_eq!(first_round.len(), 100);
    let first_infos: Vec<_> = first_round
        .iter()
        .map(|d| reply::reply_info(d.reply.as_deref().unwrap()).unwrap())
        .collect();
    assert!(first_infos.iter().all(|i| i.deliver_count == 1));

    assert_eq!(engine.stats_msgset(&account, &msgset_name).unwrap().msgs, 100);

    tokio::time::sleep(Duration::from_millis(250)).await;

    for i in 0..100u32 {
        engine
            .handle_pull_request(&account, &msgset_name, &observable_name, format!("inbox2.{i}"), b"1")
            .await
            .unwrap();
    }
    let second_round = transport.drain();
    assert_eq!(second_round.len(), 100);
    let mut second_infos: Vec<_> = second_round
        .iter()
        .map(|d| reply::reply_info(d.reply.as_deref().unwrap()).unwrap())
        .collect();
    second_infos.sort_by_key(|i| i.deliver_seq);
    for (idx, info) in second_infos.iter().enumerate() {
        assert_eq!(info.deliver_seq, 101 + idx as u64);
        assert!(info.deliver_count > 1);
    }

    for d in &second_round {
        engine
            .handle_ack_reply(&account, d.reply.as_deref().unwrap(), None, b"")
            .await;
    }
    assert_eq!(engine.stats_msgset(&account, &msgset_name).unwrap().msgs, 0);
}

/// Scenario 3: working indicator extends ack_wait without advancing.
#[tokio::test]
async fn working_indicator_extends_ack_wait() {
    let transport = FakeTransport::new();
    let (engine, account) = engine_with_account(transport.clone());
    let msgset_name: msgset_types::names::MsgSetName = "MY_WQ2".parse().unwrap();
    engine
        .create_msgset(&account, msgset_name.clone(), msgset_cfg(&["wq2.*"], RetentionPolicy::WorkQueue))
        .unwrap();
    engine
        .publish(&account, "wq2.msgs", None, Bytes::from_static(b"one"), OffsetDateTime::now_utc())
        .await;
    engine
        .publish(&account, "wq2.msgs", None, Bytes::from_static(b"two"), OffsetDateTime::now_utc())
        .await;

    let observable_name: msgset_types::names::ObservableName = "holder".parse().unwrap();
    engine
        .add_observable(
            &account,
            &msgset_name,
            observable_name.clone(),
            ObservableConfig {
                ack_policy: AckPolicy::Explicit,
                ack_wait: Duration::from_millis(50),
                start: StartPolicy::All,
                ..Default::default()
            },
        )
        .unwrap();

    engine
        .handle_pull_request(&account, &msgset_name, &observable_name, "p1".into(), b"1")
        .await
        .unwrap();
    let d = transport.drain();
    assert_eq!(d.len(), 1);
    let first_ack = d[0].reply.clone().unwrap();
    assert_eq!(reply::reply_info(&first_ack).unwrap().deliver_seq, 1);

    tokio::time::sleep(Duration::from_millis(80)).await;

    engine
        .handle_pull_request(&account, &msgset_name, &observable_name, "p2".into(), b"1")
        .await
        .unwrap();
    let d = transport.drain();
    assert_eq!(d.len(), 1);
    let held_ack = d[0].reply.clone().unwrap();
    let held_info = reply::reply_info(&held_ack).unwrap();
    assert_eq!(held_info.deliver_seq, 2);
    assert!(held_info.deliver_count > 1);

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(12)).await;
        engine.handle_ack_reply(&account, &held_ack, None, AckKind::PROGRESS_SENTINEL).await;
    }

    engine
        .handle_pull_request(&account, &msgset_name, &observable_name, "p3".into(), b"1")
        .await
        .unwrap();
    let d = transport.drain();
    assert_eq!(d.len(), 1);
    let second_msg_ack = d[0].reply.clone().unwrap();
    assert_eq!(reply::reply_info(&second_msg_ack).unwrap().deliver_seq, 3);

    engine.handle_ack_reply(&account, &held_ack, None, b"").await;
    engine.handle_ack_reply(&account, &second_msg_ack, None, b"").await;

    assert_eq!(engine.stats_msgset(&account, &msgset_name).unwrap().msgs, 0);
}

/// Scenario 4: partitioned push delivery only sees its own subject.
#[tokio::test]
async fn partitioned_delivery() {
    let transport = FakeTransport::new();
    let (engine, account) = engine_with_account(transport.clone());
    let msgset_name: msgset_types::names::MsgSetName = "MSET".parse().unwrap();
    engine
        .create_msgset(&account, msgset_name.clone(), msgset_cfg(&["foo.*"], RetentionPolicy::Stream))
        .unwrap();

    for i in 0..50u32 {
        engine
            .publish(&account, "foo.A", None, Bytes::from(format!("A:{i}")), OffsetDateTime::now_utc())
            .await;
        engine
            .publish(&account, "foo.B", None, Bytes::from(format!("B:{i}")), OffsetDateTime::now_utc())
            .await;
    }

    transport.set_interest("out.b");
    let observable_name: msgset_types::names::ObservableName = "b-only".parse().unwrap();
    engine
        .add_observable(
            &account,
            &msgset_name,
            observable_name,
            ObservableConfig {
                delivery_subject: Some(Subject::new("out.b").unwrap()),
                partition: Some(Subject::new("foo.B").unwrap()),
                ack_policy: AckPolicy::None,
                start: StartPolicy::All,
                ..Default::default()
            },
        )
        .unwrap();

    settle().await;

    let delivered = transport.drain();
    let to_b: Vec<_> = delivered.iter().filter(|d| d.subject == "out.b").collect();
    assert_eq!(to_b.len(), 50);
    for d in &to_b {
        assert!(d.payload.starts_with(b"B:"));
    }
    let mut seqs: Vec<_> = to_b
        .iter()
        .map(|d| reply::reply_info(d.reply.as_deref().unwrap()).unwrap().deliver_seq)
        .collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=50).collect::<Vec<_>>());
}

/// Scenario 5: Interest retention clears once all three cursors ack past
/// a message.
#[tokio::test]
async fn interest_retention_three_way_ack() {
    let transport = FakeTransport::new();
    let (engine, account) = engine_with_account(transport.clone());
    let msgset_name: msgset_types::names::MsgSetName = "DC".parse().unwrap();
    engine
        .create_msgset(&account, msgset_name.clone(), msgset_cfg(&["dc.*"], RetentionPolicy::Interest))
        .unwrap();

    for i in 0..100u32 {
        engine
            .publish(&account, "dc.msgs", None, Bytes::from(format!("m{i}")), OffsetDateTime::now_utc())
            .await;
    }

    for subject in ["out.explicit", "out.all", "out.none"] {
        transport.set_interest(subject);
    }
    engine
        .add_observable(
            &account,
            &msgset_name,
            "explicit".parse().unwrap(),
            ObservableConfig {
                delivery_subject: Some(Subject::new("out.explicit").unwrap()),
                ack_policy: AckPolicy::Explicit,
                start: StartPolicy::All,
                ..Default::default()
            },
        )
        .unwrap();
    engine
        .add_observable(
            &account,
            &msgset_name,
            "all".parse().unwrap(),
            ObservableConfig {
                delivery_subject: Some(Subject::new("out.all").unwrap()),
                ack_policy: AckPolicy::All,
                start: StartPolicy::All,
                ..Default::default()
            },
        )
        .unwrap();
    engine
        .add_observable(
            &account,
            &msgset_name,
            "none".parse().unwrap(),
            ObservableConfig {
                delivery_subject: Some(Subject::new("out.none").unwrap()),
                ack_policy: AckPolicy::None,
                start: StartPolicy::All,
                ..Default::default()
            },
        )
        .unwrap();

    settle().await;
    let delivered = transport.drain();

    let mut by_observable: std::collections::HashMap<String, Vec<(u64, String)>> = Default::default();
    for d in &delivered {
        let Some(reply) = &d.reply else { continue };
        let Ok((_, observable, info)) = reply::decode(reply) else { continue };
        by_observable
            .entry(observable)
            .or_default()
            .push((info.store_seq, reply.clone()));
    }
    for v in by_observable.values_mut() {
        v.sort_by_key(|(seq, _)| *seq);
    }
    assert_eq!(by_observable["explicit"].len(), 100);
    assert_eq!(by_observable["all"].len(), 100);
    assert_eq!(by_observable["none"].len(), 100);

    // Ack even store_seqs on the Explicit observable.
    for (seq, reply) in &by_observable["explicit"] {
        if seq % 2 == 0 {
            engine.handle_ack_reply(&account, reply, None, b"").await;
        }
    }

    // Ack the 1st, 2nd, 3rd on the All observable.
    for (_, reply) in by_observable["all"].iter().take(3) {
        engine.handle_ack_reply(&account, reply, None, b"").await;
    }

    // Ack remaining odd store_seqs on Explicit.
    for (seq, reply) in &by_observable["explicit"] {
        if seq % 2 == 1 {
            engine.handle_ack_reply(&account, reply, None, b"").await;
        }
    }

    // Ack the 100th on All.
    let (_, last_all_reply) = by_observable["all"].last().unwrap();
    engine.handle_ack_reply(&account, last_all_reply, None, b"").await;

    assert_eq!(engine.stats_msgset(&account, &msgset_name).unwrap().msgs, 0);
}

/// Scenario 6: Original replay paces inter-departure gaps to match the
/// recorded inter-arrival gaps.
#[tokio::test]
async fn replay_original_paces_delivery() {
    let transport = FakeTransport::new();
    let (engine, account) = engine_with_account(transport.clone());
    let msgset_name: msgset_types::names::MsgSetName = "REPLAY".parse().unwrap();
    engine
        .create_msgset(&account, msgset_name.clone(), msgset_cfg(&["gap.*"], RetentionPolicy::Stream))
        .unwrap();

    let gaps_ms = [90u64, 60, 110, 70, 100, 80, 120, 60, 90, 70];
    let mut ts = OffsetDateTime::now_utc();
    for (i, gap) in gaps_ms.iter().enumerate() {
        if i > 0 {
            ts += Duration::from_millis(*gap);
        }
        engine
            .publish(&account, "gap.msg", None, Bytes::from(format!("m{i}")), ts)
            .await;
    }

    transport.set_interest("out.replay");
    engine
        .add_observable(
            &account,
            &msgset_name,
            "pacer".parse().unwrap(),
            ObservableConfig {
                delivery_subject: Some(Subject::new("out.replay").unwrap()),
                ack_policy: AckPolicy::None,
                start: StartPolicy::All,
                replay: ReplayPolicy::Original,
                ..Default::default()
            },
        )
        .unwrap();

    let total: u64 = gaps_ms.iter().sum();
    tokio::time::sleep(Duration::from_millis(total + 300)).await;

    let delivered = transport.drain();
    let mut to_pacer: Vec<_> = delivered.into_iter().filter(|d| d.subject == "out.replay").collect();
    to_pacer.sort_by_key(|d| d.at);
    assert_eq!(to_pacer.len(), 10);

    for i in 1..to_pacer.len() {
        let measured = to_pacer[i].at.duration_since(to_pacer[i - 1].at);
        let expected = Duration::from_millis(gaps_ms[i]);
        assert!(
            measured + Duration::from_millis(20) >= expected,
            "gap {i}: measured {measured:?} below expected {expected:?}"
        );
        assert!(
            measured <= expected + Duration::from_millis(80),
            "gap {i}: measured {measured:?} too far above expected {expected:?}"
        );
    }
}
