use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use idalloc::test_utils::InMemoryCluster;
use idalloc::{
    AllocationSizes, Config, IdGenerator, IdGeneratorFactory, IdReusabilityCondition, IdType,
    LeaderInfo, LeaderListener, LeadershipState, ReplicatedContent, ReplicatedIdGeneratorFactory,
    id_generator_factory,
};

fn factory(cluster: &Arc<InMemoryCluster>, member: usize, sizes: AllocationSizes) -> ReplicatedIdGeneratorFactory {
    ReplicatedIdGeneratorFactory::new(Arc::new(cluster.acquirer(member, sizes)))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_hand_out_globally_unique_ids_across_members() {
    // given
    let dir = tempfile::tempdir().unwrap();
    let cluster = InMemoryCluster::new(3);
    let sizes = AllocationSizes::default().with(IdType::Node, 7);
    let mut tasks = Vec::new();

    // when
    for member in 0..cluster.size() {
        let factory = factory(&cluster, member, sizes.clone());
        let generator = factory
            .open(&dir.path().join(format!("node-{member}.id")), IdType::Node, 0)
            .unwrap();
        for _ in 0..4 {
            let generator = generator.clone();
            tasks.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..50 {
                    ids.push(generator.next_id().await.unwrap());
                }
                ids
            }));
        }
    }
    let mut all = Vec::new();
    for task in tasks {
        all.extend(task.await.unwrap());
    }

    // then
    let unique: HashSet<u64> = all.iter().copied().collect();
    assert_eq!(unique.len(), all.len());
    let granted = cluster.state_machine(0).first_unallocated(IdType::Node);
    assert!(all.iter().all(|id| *id < granted));
    for member in 1..cluster.size() {
        assert_eq!(cluster.state_machine(member).first_unallocated(IdType::Node), granted);
    }
}

#[tokio::test]
async fn should_stay_unique_with_duplicate_delivery_and_racing_requests() {
    // given
    let dir = tempfile::tempdir().unwrap();
    let cluster = InMemoryCluster::new(2);
    cluster.set_duplicate_delivery(true);
    let sizes = AllocationSizes::default().with(IdType::Relationship, 3);
    let a = factory(&cluster, 0, sizes.clone())
        .open(&dir.path().join("a.id"), IdType::Relationship, 0)
        .unwrap();
    let b = factory(&cluster, 1, sizes)
        .open(&dir.path().join("b.id"), IdType::Relationship, 0)
        .unwrap();
    let mut ids = Vec::new();

    // when
    for round in 0..20 {
        if round % 3 == 0 {
            // a stale request from a lagging member sneaks in first
            cluster.inject_before_next(ReplicatedContent::IdAllocation(
                idalloc::ReplicatedIdAllocationRequest::new(
                    cluster.member_id(1),
                    IdType::Relationship,
                    0,
                    3,
                ),
            ));
        }
        ids.push(a.next_id().await.unwrap());
        ids.push(b.next_id().await.unwrap());
    }

    // then
    let unique: HashSet<u64> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len());
    assert_eq!(
        cluster.state_machine(0).snapshot(),
        cluster.state_machine(1).snapshot()
    );
}

struct Leadership(AtomicI64);

impl LeadershipState for Leadership {
    fn last_log_index_before_we_became_leader(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn should_reuse_freed_ids_only_on_caught_up_leader() {
    // given
    let dir = tempfile::tempdir().unwrap();
    let cluster = InMemoryCluster::new(2);
    let me = cluster.member_id(0);
    let leadership = Arc::new(Leadership(AtomicI64::new(0)));
    let condition = Arc::new(IdReusabilityCondition::new(
        me,
        cluster.command_index_tracker(0),
        leadership.clone(),
    ));
    let acquirer = Arc::new(cluster.acquirer(0, AllocationSizes::default()));
    let factory = id_generator_factory(&Config::default(), acquirer, condition.clone());
    let generator = factory
        .open(&dir.path().join("node.id"), IdType::Node, 0)
        .unwrap();
    for _ in 0..10 {
        generator.next_id().await.unwrap();
    }

    // when - another member leads, then this member takes over
    condition.on_leader_switch(LeaderInfo::new(Some(cluster.member_id(1)), 1));
    generator.free_id(1).await.unwrap();
    leadership.0.store(cluster.log_len() as i64 - 1, Ordering::SeqCst);
    condition.on_leader_switch(LeaderInfo::new(Some(me), 2));
    generator.free_id(2).await.unwrap();

    // then
    assert_eq!(generator.defrag_count().await, 1);
    assert_eq!(generator.next_id().await.unwrap(), 2);
    assert_eq!(generator.next_id().await.unwrap(), 10);
}

#[tokio::test]
async fn should_surface_replication_failure_to_caller() {
    // given
    let dir = tempfile::tempdir().unwrap();
    let cluster = InMemoryCluster::new(1);
    let generator = factory(&cluster, 0, AllocationSizes::default())
        .open(&dir.path().join("node.id"), IdType::Node, 0)
        .unwrap();
    cluster.fail_always(idalloc::Error::Replication("quorum lost".to_string()));

    // when
    let failed = generator.next_id().await;
    cluster.clear_failure();
    let recovered = generator.next_id().await;

    // then
    assert!(matches!(failed, Err(idalloc::Error::Replication(_))));
    assert_eq!(recovered.unwrap(), 0);
}
