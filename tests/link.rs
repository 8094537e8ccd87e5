use std::io::Write;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use serial_test::serial;

use drone_sync::link::{
    reader_worker, AttitudeMsg, Connection, FramedLink, HeartbeatMsg, LinkInbox, LinkMessage, MessageKind, ReaderArgs,
};
use drone_sync::queue::{BoundedQueue, Drainable};
use drone_sync::worker::{Signal, WorkerArgs, WorkerGroup, WorkerSpec};

const FRAMES_PER_KIND: usize = 20;

#[derive(Clone)]
struct Counter{
    inbox: LinkInbox,
    kind: MessageKind,
    counts: BoundedQueue<(MessageKind, usize)>,
}

impl WorkerArgs for Counter{}

//counts one kind until all frames arrived or the inbox went quiet
fn count_kind(args: Counter) -> anyhow::Result<()>{
    let mut seen = 0;
    while seen < FRAMES_PER_KIND && args.inbox.receive(args.kind, true, Duration::from_secs(2)).is_some(){
        seen += 1;
    }
    args.counts.put(&(args.kind, seen))?;
    Ok(())
}

#[test]
#[serial]
fn test_forked_consumers_share_one_stream(){
    let (mut vehicle, station) = UnixStream::pair().unwrap();
    station.set_read_timeout(Some(Duration::from_millis(10))).unwrap();

    let inbox = LinkInbox::create(32).unwrap();
    let signal = Signal::new().unwrap();
    let counts: BoundedQueue<(MessageKind, usize)> = BoundedQueue::new("counts", 4).unwrap();

    let reader_args = ReaderArgs{
        connection: Connection::new(FramedLink::new(station)),
        inbox: inbox.clone(),
        signal: signal.clone(),
        poll: Duration::from_millis(20),
    };
    let mut reader = WorkerGroup::create(
        WorkerSpec::create("link_reader", 1, reader_worker, reader_args, Vec::new(), inbox.drainables()).unwrap(),
    )
    .unwrap();

    let counter = |kind: MessageKind| {
        let args = Counter{ inbox: inbox.clone(), kind, counts: counts.clone() };
        WorkerGroup::create(
            WorkerSpec::create("counter", 1, count_kind, args, inbox.drainables(), vec![counts.drainable()]).unwrap(),
        )
        .unwrap()
    };
    let mut beats = counter(MessageKind::Heartbeat);
    let mut attitudes = counter(MessageKind::Attitude);

    reader.start().unwrap();
    beats.start().unwrap();
    attitudes.start().unwrap();

    for i in 0..FRAMES_PER_KIND as u32{
        let beat = LinkMessage::Heartbeat(HeartbeatMsg{ custom_mode: i, ..Default::default() });
        let attitude = LinkMessage::Attitude(AttitudeMsg{ time_boot_ms: i, ..Default::default() });
        vehicle.write_all(&beat.encode().unwrap()).unwrap();
        vehicle.write_all(&attitude.encode().unwrap()).unwrap();
    }

    let mut received = Vec::new();
    while received.len() < 2{
        if let Some(count) = counts.get(Duration::from_secs(10)).unwrap(){
            received.push(count);
        }
    }

    signal.request_exit();
    for queue in inbox.drainables(){
        queue.drain().unwrap();
    }
    assert!(beats.join(Duration::from_secs(5)).unwrap().is_clean());
    assert!(attitudes.join(Duration::from_secs(5)).unwrap().is_clean());
    assert!(reader.join(Duration::from_secs(5)).unwrap().is_clean());

    let count_of = |kind: MessageKind| received.iter().find(|(k, _)| *k == kind).map(|(_, n)| *n);
    assert_eq!(count_of(MessageKind::Heartbeat), Some(FRAMES_PER_KIND));
    assert_eq!(count_of(MessageKind::Attitude), Some(FRAMES_PER_KIND));
}
