use stakechain_chain::{
    BlockId, BlockStatus, ChainConfig, ChainError, ChainEvent, ChainManager, GenesisConfig,
    ReceiveOutcome,
};
use stakechain_core::{
    Address, Block, ChainParams, Evidence, Hash, Keypair, Transaction, COIN,
};
use stakechain_storage::Storage;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

const T0: u64 = 1_700_000_000;

fn params() -> ChainParams {
    ChainParams {
        min_validator_stake: 100 * COIN,
        confirmation_depth: 3,
        slash_cooldown_blocks: 4,
        unbonding_blocks: 3,
        ..ChainParams::default()
    }
}

fn config(params: &ChainParams) -> ChainConfig {
    ChainConfig {
        params: params.clone(),
        ..ChainConfig::default()
    }
}

fn copy_key(kp: &Keypair) -> Keypair {
    Keypair::from_private_key(&kp.private_key())
}

/// One node per validator, all started from the same genesis.
struct Network {
    validators: Vec<Keypair>,
    nodes: Vec<ChainManager>,
}

impl Network {
    fn new(params: ChainParams, stakes: &[u64], allocations: Vec<(Address, u64)>) -> Self {
        let keys = stakes.iter().map(|stake| (Keypair::generate(), *stake)).collect();
        Self::with_keys(params, keys, allocations)
    }

    /// A node for every key. Keys with zero stake start as plain accounts.
    fn with_keys(
        params: ChainParams,
        keys: Vec<(Keypair, u64)>,
        allocations: Vec<(Address, u64)>,
    ) -> Self {
        let genesis = GenesisConfig {
            timestamp: T0,
            allocations,
            validators: keys
                .iter()
                .filter(|(_, stake)| *stake > 0)
                .map(|(kp, stake)| (kp.public_key, *stake))
                .collect(),
        };
        let validators: Vec<Keypair> = keys.into_iter().map(|(kp, _)| kp).collect();
        let nodes = validators
            .iter()
            .map(|kp| {
                let storage = Storage::open_temporary().unwrap();
                ChainManager::init_genesis(&storage, &params, &genesis).unwrap();
                ChainManager::open(storage, config(&params), Some(copy_key(kp))).unwrap()
            })
            .collect();
        Self { validators, nodes }
    }

    /// Rewards and fees credited to `producer` by the committed chain.
    fn earned(&self, producer: &Address) -> u64 {
        let node = &self.nodes[0];
        (1..=self.height())
            .filter_map(|h| node.get_block(BlockId::Height(h)).unwrap())
            .filter(|block| block.header.producer == *producer)
            .map(|block| 50_000_000 + block.transactions.iter().map(|tx| tx.fee).sum::<u64>())
            .sum()
    }

    fn height(&self) -> u64 {
        self.nodes[0].tip().height
    }

    fn now(&self) -> u64 {
        T0 + 5 * (self.height() + 1)
    }

    /// Let the selected node produce the next block without relaying it.
    fn produce(&mut self) -> (usize, Block) {
        let height = self.height() + 1;
        let now = self.now();
        let mut produced = Vec::new();
        for (i, node) in self.nodes.iter_mut().enumerate() {
            if let Some(block) = node.produce_block_at(height, now).unwrap() {
                produced.push((i, block));
            }
        }
        assert_eq!(produced.len(), 1, "exactly one producer per height");
        produced.remove(0)
    }

    /// Exactly one node is selected; everyone else receives its block.
    fn step(&mut self) -> (usize, Block) {
        let now = self.now();
        let (producer, block) = self.produce();

        for (i, node) in self.nodes.iter_mut().enumerate() {
            if i != producer {
                let outcome = node.receive_block_at(block.clone(), now).unwrap();
                assert_eq!(outcome, ReceiveOutcome::Committed(block.hash()));
            }
        }
        (producer, block)
    }

    fn submit_everywhere(&mut self, tx: &Transaction) {
        for node in &mut self.nodes {
            node.submit_transaction(tx.clone()).unwrap();
        }
    }

    fn assert_in_sync(&self) {
        let first = self.nodes[0].get_chain_info().unwrap();
        for node in &self.nodes[1..] {
            let info = node.get_chain_info().unwrap();
            assert_eq!(info.tip_hash, first.tip_hash);
            assert_eq!(info.cumulative_supply, first.cumulative_supply);
        }
    }
}

#[test]
fn test_genesis_with_zero_allocations() {
    let storage = Storage::open_temporary().unwrap();
    ChainManager::init_genesis(&storage, &params(), &GenesisConfig::default()).unwrap();
    let chain = ChainManager::open(storage, config(&params()), None).unwrap();

    let info = chain.get_chain_info().unwrap();
    assert_eq!(info.height, 0);
    assert_eq!(info.cumulative_supply, 0);
    assert_eq!(info.active_validators, 0);

    let genesis = chain.get_block(BlockId::Height(0)).unwrap().unwrap();
    assert!(genesis.is_genesis());
    assert_eq!(genesis.header.prev_hash, Hash::ZERO);
    assert_eq!(chain.reader().info().tip_hash, genesis.hash());
}

#[test]
fn test_nodes_agree_on_transfers() {
    let alice = Keypair::generate();
    let bob = Address([0xB0; 20]);
    let mut net = Network::new(
        params(),
        &[200 * COIN, 300 * COIN],
        vec![(alice.address(), 100 * COIN)],
    );

    let tx = Transaction::transfer(alice.public_key, bob, 40 * COIN, COIN, 0).signed(&alice);
    net.submit_everywhere(&tx);
    let (_, block) = net.step();
    assert_eq!(block.transactions, vec![tx]);
    net.assert_in_sync();

    for node in &net.nodes {
        let a = node.get_account(&alice.address()).unwrap();
        assert_eq!(a.balance, 59 * COIN);
        assert_eq!(a.nonce, 1);
        assert_eq!(node.get_account(&bob).unwrap().balance, 40 * COIN);
        assert!(node.pool().is_empty());
    }

    for _ in 0..5 {
        net.step();
    }
    net.assert_in_sync();

    // Hash links hold across the whole chain.
    let node = &net.nodes[1];
    for height in 1..=net.height() {
        let block = node.get_block(BlockId::Height(height)).unwrap().unwrap();
        let parent = node.get_block(BlockId::Height(height - 1)).unwrap().unwrap();
        assert_eq!(block.header.prev_hash, parent.hash());
        assert_eq!(
            node.get_block(BlockId::Hash(block.hash())).unwrap(),
            Some(block)
        );
    }
}

#[test]
fn test_same_block_twice_is_a_noop() {
    let mut net = Network::new(params(), &[200 * COIN, 200 * COIN], vec![]);
    let (producer, block) = net.step();
    let other = 1 - producer;
    let before = net.nodes[other].get_chain_info().unwrap();
    let balance = net.nodes[other]
        .get_account(&block.header.producer)
        .unwrap()
        .balance;

    let outcome = net.nodes[other]
        .receive_block_at(block.clone(), T0 + 100)
        .unwrap();
    assert_eq!(outcome, ReceiveOutcome::AlreadyCommitted);
    assert_eq!(net.nodes[other].get_chain_info().unwrap(), before);
    assert_eq!(
        net.nodes[other]
            .get_account(&block.header.producer)
            .unwrap()
            .balance,
        balance
    );
}

#[test]
fn test_insufficient_balance_never_reaches_a_block() {
    let alice = Keypair::generate();
    let mut net = Network::new(params(), &[200 * COIN], vec![(alice.address(), 10 * COIN)]);

    let tx = Transaction::transfer(alice.public_key, Address([1; 20]), 10 * COIN, 1, 0)
        .signed(&alice);
    let err = net.nodes[0].submit_transaction(tx).unwrap_err();
    assert_eq!(err.code(), "insufficient_balance");
    assert!(!err.is_fatal());
}

#[test]
fn test_equivocation_is_slashed_and_benched() {
    let mut net = Network::new(params(), &[200 * COIN, 200 * COIN], vec![]);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let first = net.nodes.remove(0);
    net.nodes.insert(0, first.with_events(Arc::new(events_tx)));

    let (producer, block) = net.step();
    let offender = net.validators[producer].address();
    let state_before = net.nodes[0].get_chain_info().unwrap();

    // Same producer signs a second block at height 1.
    let rival = Block::new(
        1,
        block.header.prev_hash,
        block.header.timestamp + 1,
        offender,
        vec![],
        vec![],
        block.header.state_root,
    )
    .signed(&net.validators[producer]);
    for node in &mut net.nodes {
        let outcome = node.receive_block_at(rival.clone(), T0 + 10).unwrap();
        assert_eq!(outcome, ReceiveOutcome::Orphaned { evidence: true });
        assert_eq!(
            node.block_status(&rival.hash()).unwrap(),
            Some(BlockStatus::Orphaned)
        );
        assert_eq!(node.pending_evidence(), 1);
    }
    // The orphan changed nothing.
    assert_eq!(net.nodes[0].get_chain_info().unwrap(), state_before);

    let (_, carrier) = net.step();
    assert_eq!(carrier.evidence.len(), 1);
    net.assert_in_sync();
    for node in &net.nodes {
        let account = node.get_account(&offender).unwrap();
        assert_eq!(account.staked, 190 * COIN);
        assert!(!account.active);
        assert_eq!(account.cooldown_until, Some(2 + 4));
        assert_eq!(node.pending_evidence(), 0);
    }

    let mut slashed = false;
    while let Ok(event) = events.try_recv() {
        if let ChainEvent::ValidatorSlashed { address, height } = event {
            assert_eq!((address, height), (offender, 1));
            slashed = true;
        }
    }
    assert!(slashed);

    // Benched for the cooldown window, then eligible again.
    while net.height() < 6 {
        let (producer_index, _) = net.step();
        assert_ne!(net.validators[producer_index].address(), offender);
    }
    let account = net.nodes[0].get_account(&offender).unwrap();
    assert!(account.is_eligible(7, params().min_validator_stake));
    assert_eq!(net.nodes[0].get_chain_info().unwrap().active_validators, 2);
}

#[test]
fn test_competing_block_is_orphaned_and_finality_is_enforced() {
    let mut net = Network::new(params(), &[200 * COIN, 200 * COIN], vec![]);
    let (producer, block) = net.step();
    let other = 1 - producer;

    // A block at height 1 signed by the validator that was not selected.
    let competing = Block::new(
        1,
        block.header.prev_hash,
        block.header.timestamp,
        net.validators[other].address(),
        vec![],
        vec![],
        block.header.state_root,
    )
    .signed(&net.validators[other]);
    let outcome = net.nodes[producer]
        .receive_block_at(competing.clone(), T0 + 5)
        .unwrap();
    assert_eq!(outcome, ReceiveOutcome::Orphaned { evidence: false });
    assert_eq!(net.nodes[producer].tip().hash, net.nodes[other].tip().hash);
    assert!(net.nodes[producer].get_orphan(&competing.hash()).is_some());

    for _ in 0..4 {
        net.step();
    }
    // Height 1 is now final: the orphan is pruned and replacements refused.
    assert!(net.nodes[producer].get_orphan(&competing.hash()).is_none());
    let late = Block::new(
        1,
        block.header.prev_hash,
        block.header.timestamp + 2,
        net.validators[other].address(),
        vec![],
        vec![],
        block.header.state_root,
    )
    .signed(&net.validators[other]);
    assert!(matches!(
        net.nodes[producer].receive_block_at(late, T0 + 50),
        Err(ChainError::Finalized { height: 1, finalized: 2 })
    ));
    assert_eq!(
        net.nodes[producer].block_status(&block.hash()).unwrap(),
        Some(BlockStatus::Finalized)
    );
}

#[test]
fn test_wrong_producer_is_rejected() {
    let mut net = Network::new(params(), &[200 * COIN, 200 * COIN], vec![]);
    let height = 1;
    let now = net.now();
    let mut produced = None;
    for (i, node) in net.nodes.iter_mut().enumerate() {
        if let Some(block) = node.produce_block_at(height, now).unwrap() {
            produced = Some((i, block));
        }
    }
    let (producer, block) = produced.unwrap();
    let other = 1 - producer;

    // The unselected validator re-signs the same contents as its own.
    let mut forged = block.clone();
    forged.header.producer = net.validators[other].address();
    let forged = forged.signed(&net.validators[other]);
    let err = net.nodes[other]
        .receive_block_at(forged.clone(), now)
        .unwrap_err();
    assert_eq!(err.code(), "wrong_producer");
    assert_eq!(net.nodes[other].tip().height, 0);
    assert_eq!(
        net.nodes[other].block_status(&forged.hash()).unwrap(),
        Some(BlockStatus::Rejected("wrong_producer"))
    );

    // The genuine block is still accepted afterwards.
    assert_eq!(
        net.nodes[other].receive_block_at(block.clone(), now).unwrap(),
        ReceiveOutcome::Committed(block.hash())
    );
}

#[test]
fn test_halving_boundary() {
    let params = ChainParams {
        halving_interval: 4,
        ..params()
    };
    let mut net = Network::new(params, &[200 * COIN], vec![]);
    let mut supply = net.nodes[0].get_chain_info().unwrap().cumulative_supply;

    for height in 1..=9u64 {
        let expected = match height {
            1..=4 => 50_000_000,
            5..=8 => 25_000_000,
            _ => 12_500_000,
        };
        assert_eq!(
            net.nodes[0].get_chain_info().unwrap().current_reward,
            expected,
            "reward for block {height}"
        );
        net.step();
        supply += expected;
        let info = net.nodes[0].get_chain_info().unwrap();
        assert_eq!(info.cumulative_supply, supply);
        assert_eq!(info.era, (height - 1) / 4);
    }
}

#[test]
fn test_supply_cap_truncates_rewards() {
    let params = ChainParams {
        supply_cap: 200 * COIN + 75_000_000,
        ..params()
    };
    let mut net = Network::new(params.clone(), &[200 * COIN], vec![]);
    let producer = net.validators[0].address();

    let mut credited = Vec::new();
    for _ in 0..4 {
        let before = net.nodes[0].get_account(&producer).unwrap().balance;
        net.step();
        let after = net.nodes[0].get_account(&producer).unwrap().balance;
        credited.push(after - before);
        assert!(net.nodes[0].get_chain_info().unwrap().cumulative_supply <= params.supply_cap);
    }
    assert_eq!(credited, vec![50_000_000, 25_000_000, 0, 0]);
    assert_eq!(
        net.nodes[0].get_chain_info().unwrap().cumulative_supply,
        params.supply_cap
    );
}

#[test]
fn test_stake_unstake_round_trip() {
    let carol = Keypair::generate();
    let carol_address = carol.address();
    let mut net = Network::with_keys(
        params(),
        vec![(Keypair::generate(), 200 * COIN), (copy_key(&carol), 0)],
        vec![(carol_address, 150 * COIN)],
    );

    let stake = Transaction::stake(carol.public_key, 100 * COIN, COIN, 0).signed(&carol);
    net.submit_everywhere(&stake);
    net.step();
    let account = net.nodes[0].get_account(&carol_address).unwrap();
    assert_eq!(account.staked, 100 * COIN);
    assert_eq!(account.balance, 49 * COIN);
    assert!(account.active);
    assert_eq!(net.nodes[0].get_chain_info().unwrap().active_validators, 2);

    let unstake = Transaction::unstake(carol.public_key, 100 * COIN, COIN, 1).signed(&carol);
    net.submit_everywhere(&unstake);
    let (_, block) = net.step();
    assert_eq!(block.transactions, vec![unstake]);
    let unstaked_at = net.height();

    let account = net.nodes[0].get_account(&carol_address).unwrap();
    assert_eq!(account.staked, 0);
    assert!(!account.active);
    assert_eq!(account.unbonding_total(), 100 * COIN);
    assert_eq!(account.balance, 48 * COIN + net.earned(&carol_address));
    assert_eq!(net.nodes[0].get_chain_info().unwrap().active_validators, 1);

    // Locked until the unbonding period has passed.
    while net.height() < unstaked_at + 2 {
        net.step();
    }
    let account = net.nodes[0].get_account(&carol_address).unwrap();
    assert_eq!(account.unbonding_total(), 100 * COIN);

    net.step();
    net.assert_in_sync();
    let account = net.nodes[0].get_account(&carol_address).unwrap();
    assert!(account.unbonding.is_empty());
    assert_eq!(account.balance, 148 * COIN + net.earned(&carol_address));
}

#[test]
fn test_restart_keeps_tip_and_discards_partial_block() {
    let dir = TempDir::new().unwrap();
    let validator = Keypair::generate();
    let genesis = GenesisConfig {
        timestamp: T0,
        validators: vec![(validator.public_key, 200 * COIN)],
        ..Default::default()
    };

    let (tip, stray) = {
        let storage = Storage::open(dir.path()).unwrap();
        ChainManager::init_genesis(&storage, &params(), &genesis).unwrap();
        let mut chain =
            ChainManager::open(storage.clone(), config(&params()), Some(copy_key(&validator)))
                .unwrap();
        for height in 1..=3 {
            chain.produce_block_at(height, T0 + 5 * height).unwrap().unwrap();
        }

        // A block written without its metadata update, as after a crash.
        let mut stray = chain.get_block(BlockId::Height(3)).unwrap().unwrap();
        stray.header.height = 4;
        storage
            .put(Storage::block_height_key(4), &stray)
            .unwrap();
        chain.flush().unwrap();
        (chain.tip().clone(), stray)
    };

    let storage = Storage::open(dir.path()).unwrap();
    let chain = ChainManager::open(storage, config(&params()), None).unwrap();
    assert_eq!(chain.tip(), &tip);
    assert_eq!(chain.get_block(BlockId::Height(4)).unwrap(), None);
    assert_eq!(chain.block_status(&stray.hash()).unwrap(), None);
    assert_eq!(chain.get_chain_info().unwrap().height, 3);
}

#[test]
fn test_tampered_relay_convicts_nobody() {
    let alice = Keypair::generate();
    let mut net = Network::new(
        params(),
        &[200 * COIN, 200 * COIN],
        vec![(alice.address(), 100 * COIN)],
    );
    let tx = Transaction::transfer(alice.public_key, Address([0xB0; 20]), COIN, 1, 0)
        .signed(&alice);
    net.submit_everywhere(&tx);

    let now = net.now();
    let (producer, block) = net.produce();
    let other = 1 - producer;
    let offender = net.validators[producer].address();
    assert_eq!(block.transactions.len(), 1);

    // A relay strips the body; the signed header is untouched.
    let mut tampered = block.clone();
    tampered.transactions.clear();
    assert_eq!(tampered.hash(), block.hash());
    let err = net.nodes[other]
        .receive_block_at(tampered, now)
        .unwrap_err();
    assert_eq!(err.code(), "malformed_block");
    assert_eq!(net.nodes[other].pending_evidence(), 0);
    assert_eq!(net.nodes[other].block_status(&block.hash()).unwrap(), None);

    assert_eq!(
        net.nodes[other].receive_block_at(block.clone(), now).unwrap(),
        ReceiveOutcome::Committed(block.hash())
    );
    assert_eq!(
        net.nodes[other].block_status(&block.hash()).unwrap(),
        Some(BlockStatus::Committed)
    );

    for _ in 0..3 {
        let (_, carrier) = net.step();
        assert!(carrier.evidence.is_empty());
    }
    net.assert_in_sync();
    for node in &net.nodes {
        assert_eq!(node.get_account(&offender).unwrap().staked, 200 * COIN);
        assert_eq!(node.pending_evidence(), 0);
    }
}

#[test]
fn test_invalid_block_is_slashed_once() {
    let alice = Keypair::generate();
    let mut net = Network::new(
        params(),
        &[200 * COIN, 200 * COIN],
        vec![(alice.address(), 100 * COIN)],
    );
    let now = net.now();
    let (producer, block) = net.produce();
    let other = 1 - producer;
    let offender = net.validators[producer].address();

    // The producer signs a block whose root commits to a forged transaction.
    let mut forged = Transaction::transfer(alice.public_key, offender, COIN, 1, 0)
        .signed(&alice);
    forged.amount = 90 * COIN;
    let bad = Block::new(
        1,
        block.header.prev_hash,
        block.header.timestamp,
        offender,
        vec![forged],
        vec![],
        block.header.state_root,
    )
    .signed(&net.validators[producer]);

    let err = net.nodes[other].receive_block_at(bad.clone(), now).unwrap_err();
    assert_eq!(err.code(), "malformed_block");
    assert_eq!(
        net.nodes[other].block_status(&bad.hash()).unwrap(),
        Some(BlockStatus::Rejected("malformed_block"))
    );
    assert_eq!(net.nodes[other].pending_evidence(), 1);
    assert_eq!(net.nodes[other].tip().height, 0);

    assert_eq!(
        net.nodes[other].receive_block_at(block.clone(), now).unwrap(),
        ReceiveOutcome::Committed(block.hash())
    );
    // The producer's own node learns of the offence through gossip.
    let evidence = Evidence::invalid_block(bad);
    for node in &mut net.nodes {
        node.submit_evidence(evidence.clone()).unwrap();
        assert_eq!(node.pending_evidence(), 1);
    }

    let (_, carrier) = net.step();
    assert_eq!(carrier.evidence, vec![evidence.clone()]);
    net.assert_in_sync();
    for node in &net.nodes {
        assert_eq!(node.get_account(&offender).unwrap().staked, 190 * COIN);
        assert_eq!(node.pending_evidence(), 0);
    }

    let err = net.nodes[other].submit_evidence(evidence).unwrap_err();
    assert_eq!(err.code(), "already_slashed");
    for _ in 0..3 {
        let (_, carrier) = net.step();
        assert!(carrier.evidence.is_empty());
    }
    for node in &net.nodes {
        assert_eq!(node.get_account(&offender).unwrap().staked, 190 * COIN);
    }
}

#[test]
fn test_orphans_need_stake_a_sane_clock_and_room() {
    let mut net = Network::new(params(), &[200 * COIN, 200 * COIN], vec![]);
    let (producer, block) = net.step();
    let other = 1 - producer;
    let signer = &net.validators[other];
    let competing = |timestamp: u64, key: &Keypair| {
        Block::new(
            1,
            block.header.prev_hash,
            timestamp,
            key.address(),
            vec![],
            vec![],
            block.header.state_root,
        )
        .signed(key)
    };
    let node = &mut net.nodes[producer];

    let stranger = Keypair::generate();
    let err = node
        .receive_block_at(competing(T0 + 1, &stranger), T0 + 10)
        .unwrap_err();
    assert_eq!(err.code(), "producer_not_staked");

    let stale = competing(T0, signer);
    let err = node.receive_block_at(stale.clone(), T0 + 10).unwrap_err();
    assert_eq!(err.code(), "timestamp_not_increasing");
    assert_eq!(
        node.block_status(&stale.hash()).unwrap(),
        Some(BlockStatus::Rejected("timestamp_not_increasing"))
    );
    let err = node
        .receive_block_at(competing(T0 + 100, signer), T0 + 10)
        .unwrap_err();
    assert_eq!(err.code(), "timestamp_too_future");

    // Only the most recent few competitors per height are kept.
    let flood: Vec<Block> = (1..=6).map(|i| competing(T0 + i, signer)).collect();
    for orphan in &flood {
        let outcome = node.receive_block_at(orphan.clone(), T0 + 10).unwrap();
        assert_eq!(outcome, ReceiveOutcome::Orphaned { evidence: false });
    }
    for dropped in &flood[..2] {
        assert!(node.get_orphan(&dropped.hash()).is_none());
    }
    for kept in &flood[2..] {
        assert!(node.get_orphan(&kept.hash()).is_some());
    }
    assert_eq!(node.tip().hash, block.hash());
}
