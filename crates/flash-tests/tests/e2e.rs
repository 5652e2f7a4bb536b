//! End-to-end pipeline tests against the mock chain.
//!
//! Each test seeds a [`MockChain`] with wallet boxes, runs a pipeline with
//! the deterministic compiler and the local signer, and checks the result
//! with the [`PolicyChecker`] before applying it to the chain.

use flash_core::constants::{MIN_BOX_VALUE, MIN_FEE, NANOERG_PER_ERG};
use flash_core::covenant::{CovenantPolicy, CovenantState};
use flash_core::error::{CompileError, InvariantError, NetworkError, SignError};
use flash_core::register::encode_public_key;
use flash_core::traits::CovenantCompiler;
use flash_core::types::{
    Digest32, ErgoTree, RegisterId, SelectedBoxSet, SpendingProof, Token, UnspentBox,
};
use flash_wallet::{
    create_flash_loan_transaction, create_pool_top_up_transaction, create_pool_transaction,
    create_redeem_transaction, create_repayment_transaction, init_wallet, CovenantOutputBuilder,
    FlashContext, FundingRequest, LocalSigner, Signer, TransactionAssembler, WalletConfig,
    WalletError, WalletIdentity,
};
use flash_tests::helpers::*;

const LOAN: Digest32 = Digest32([0xBB; 32]);

fn flash_tree() -> ErgoTree {
    StaticCompiler::tree_of(&CovenantPolicy::flash_loan())
}

fn pool_tree() -> ErgoTree {
    StaticCompiler::tree_of(&CovenantPolicy::pool())
}

fn checker() -> PolicyChecker {
    let mut checker = PolicyChecker::new();
    checker.register(flash_tree(), CovenantPolicy::flash_loan());
    checker.register(pool_tree(), CovenantPolicy::pool());
    checker
}

/// A funded flash-loan box owned by `wallet`, placed directly on chain.
fn owned_covenant_box(wallet: &WalletIdentity, value: u64, assets: Vec<Token>) -> UnspentBox {
    let mut b = wallet_box(wallet.public_key(), 0x40, value);
    b.ergo_tree = flash_tree();
    b.registers.insert(RegisterId::R4, encode_public_key(wallet.public_key()));
    b.assets = assets;
    b
}

fn only_box(chain: &MockChain, tree: &ErgoTree) -> UnspentBox {
    let boxes = chain.boxes_at(tree);
    assert_eq!(boxes.len(), 1, "expected one box at {tree:?}");
    boxes.into_iter().next().unwrap()
}

#[tokio::test]
async fn no_secret_fails_before_any_network_call() {
    let chain = MockChain::new(100);
    let err = init_wallet(&WalletConfig::default()).unwrap_err();
    assert!(matches!(err, WalletError::Config(_)));
    assert_eq!(err.stage(), "config");
    assert_eq!(chain.calls(), 0);
}

#[tokio::test]
async fn configured_secret_initializes_wallet() {
    let wallet = init_wallet(&WalletConfig::default().with_mnemonic(PHRASE)).unwrap();
    assert_eq!(wallet.public_key(), test_wallet().public_key());
    assert!(wallet.address().to_string().starts_with('9'));
}

#[tokio::test]
async fn pool_with_too_little_funds_is_insufficient() {
    let wallet = test_wallet();
    let key = *wallet.public_key();
    let chain = MockChain::with_boxes(
        100,
        vec![wallet_box(&key, 1, 1_500_000), wallet_box(&key, 2, 400_000)],
    );
    let compiler = StaticCompiler::default();
    let ctx = FlashContext::new(&chain, &compiler, &LocalSigner);

    let err = create_pool_transaction(&ctx, &wallet).await.unwrap_err();
    assert_eq!(
        err,
        WalletError::InsufficientFunds { shortfall: MIN_BOX_VALUE + MIN_FEE - 1_900_000 }
    );
    assert_eq!(err.stage(), "selection");
}

#[tokio::test]
async fn pool_creation_and_top_up_accepted() {
    let wallet = test_wallet();
    let chain = MockChain::with_boxes(100, vec![wallet_box(wallet.public_key(), 1, 10 * NANOERG_PER_ERG)]);
    let compiler = StaticCompiler::default();
    let ctx = FlashContext::new(&chain, &compiler, &LocalSigner);
    let mut checker = checker();

    let created = create_pool_transaction(&ctx, &wallet).await.unwrap();
    assert_eq!(created.outputs[0].value, MIN_BOX_VALUE);
    assert_eq!(created.outputs[0].ergo_tree, pool_tree());
    assert_eq!(created.fee, MIN_FEE);
    checker.check(&chain, &created).unwrap();
    chain.apply(&created);

    let pool = only_box(&chain, &pool_tree());
    let topped = create_pool_top_up_transaction(&ctx, &wallet, &pool, 2_000_000).await.unwrap();
    assert_eq!(topped.inputs[0].box_id, pool.box_id);
    assert_eq!(topped.inputs[0].proof, SpendingProof::Empty);
    checker.check(&chain, &topped).unwrap();
    chain.apply(&topped);
    assert_eq!(only_box(&chain, &pool_tree()).value, 3_000_000);
}

#[tokio::test]
async fn erg_flash_loan_lifecycle() {
    let wallet = test_wallet();
    let key = *wallet.public_key();
    let chain = MockChain::with_boxes(
        100,
        vec![wallet_box(&key, 1, 5 * NANOERG_PER_ERG), wallet_box(&key, 2, 3 * NANOERG_PER_ERG)],
    );
    let compiler = StaticCompiler::default();
    let ctx = FlashContext::new(&chain, &compiler, &LocalSigner);
    let mut checker = checker();

    // Fund: marker minted with the first input's id.
    let funded = create_flash_loan_transaction(&ctx, &wallet, &FundingRequest::erg(NANOERG_PER_ERG))
        .await
        .unwrap();
    let marker = funded.inputs[0].box_id;
    assert_eq!(funded.outputs[0].assets, vec![Token::new(marker, 1)]);
    checker.check(&chain, &funded).unwrap();
    chain.apply(&funded);
    assert_eq!(checker.state(&marker), Some(CovenantState::Funded));

    // Borrow and repay with the 1 % premium.
    let covenant = only_box(&chain, &flash_tree());
    assert_eq!(covenant.value, 1_000_000_000);
    let repaid = create_repayment_transaction(&ctx, &wallet, &covenant).await.unwrap();
    assert_eq!(repaid.outputs[0].value, 1_010_000_000);
    assert_eq!(repaid.inputs[0].proof, SpendingProof::Empty);
    checker.check(&chain, &repaid).unwrap();
    chain.apply(&repaid);
    assert_eq!(checker.state(&marker), Some(CovenantState::Funded));

    // Owner redeems: everything back to the wallet, no successor.
    let covenant = only_box(&chain, &flash_tree());
    let redeemed = create_redeem_transaction(&ctx, &wallet, &covenant).await.unwrap();
    assert!(matches!(redeemed.inputs[0].proof, SpendingProof::Schnorr(_)));
    assert_eq!(redeemed.outputs.len(), 1);
    assert_eq!(redeemed.outputs[0].value, 1_010_000_000 - MIN_FEE);
    assert_eq!(redeemed.outputs[0].assets, vec![Token::new(marker, 1)]);
    checker.check(&chain, &redeemed).unwrap();
    chain.apply(&redeemed);
    assert_eq!(checker.state(&marker), Some(CovenantState::Redeemed));
    assert!(chain.boxes_at(&flash_tree()).is_empty());
}

#[tokio::test]
async fn token_flash_loan_lifecycle() {
    let wallet = test_wallet();
    let mut holder = wallet_box(wallet.public_key(), 1, 5 * NANOERG_PER_ERG);
    holder.assets.push(Token::new(LOAN, 1_000));
    let chain = MockChain::with_boxes(100, vec![holder]);
    let compiler = StaticCompiler::default();
    let ctx = FlashContext::new(&chain, &compiler, &LocalSigner);
    let mut checker = checker();

    let funded = create_flash_loan_transaction(&ctx, &wallet, &FundingRequest::token(LOAN, 100))
        .await
        .unwrap();
    let marker = funded.inputs[0].box_id;
    assert_eq!(
        funded.outputs[0].assets,
        vec![Token::new(marker, 1), Token::new(LOAN, 100)]
    );
    checker.check(&chain, &funded).unwrap();
    chain.apply(&funded);

    let covenant = only_box(&chain, &flash_tree());
    let repaid = create_repayment_transaction(&ctx, &wallet, &covenant).await.unwrap();
    assert_eq!(repaid.outputs[0].assets[1], Token::new(LOAN, 101));
    assert_eq!(repaid.outputs[0].value, covenant.value);
    checker.check(&chain, &repaid).unwrap();
    chain.apply(&repaid);

    let wallet_tokens: u64 = chain
        .boxes_at(&ErgoTree::p2pk(wallet.public_key()))
        .iter()
        .flat_map(|b| b.assets.iter())
        .filter(|t| t.token_id == LOAN)
        .map(|t| t.amount)
        .sum();
    assert_eq!(wallet_tokens, 899);
}

#[tokio::test]
async fn short_repayment_rejected_by_checker() {
    let wallet = test_wallet();
    let chain = MockChain::with_boxes(100, vec![wallet_box(wallet.public_key(), 1, 5 * NANOERG_PER_ERG)]);
    let compiler = StaticCompiler::default();
    let ctx = FlashContext::new(&chain, &compiler, &LocalSigner);
    let mut checker = checker();

    let funded = create_flash_loan_transaction(&ctx, &wallet, &FundingRequest::erg(NANOERG_PER_ERG))
        .await
        .unwrap();
    chain.apply(&funded);
    let covenant = only_box(&chain, &flash_tree());

    // Hand-built successor one nanoErg short of the premium.
    let mut successor = CovenantOutputBuilder::new(CovenantPolicy::flash_loan())
        .build_repayment_output(&covenant)
        .unwrap();
    successor.value -= 1;
    let funding = chain.boxes_at(&ErgoTree::p2pk(wallet.public_key()));
    let mut inputs = vec![covenant];
    inputs.extend(funding);
    let set = SelectedBoxSet::from_boxes(inputs).unwrap();
    let tx = TransactionAssembler::new()
        .build(&set, vec![successor], wallet.address(), 101)
        .unwrap();
    let signed = LocalSigner.sign(tx, &wallet).unwrap();

    assert!(matches!(
        checker.check(&chain, &signed),
        Err(Rejection::Covenant(InvariantError::NoSuccessor(_)))
    ));
}

#[tokio::test]
async fn spending_redeemed_instance_rejected() {
    let wallet = test_wallet();
    let chain = MockChain::with_boxes(100, vec![wallet_box(wallet.public_key(), 1, 5 * NANOERG_PER_ERG)]);
    let compiler = StaticCompiler::default();
    let ctx = FlashContext::new(&chain, &compiler, &LocalSigner);
    let mut checker = checker();

    let funded = create_flash_loan_transaction(&ctx, &wallet, &FundingRequest::erg(NANOERG_PER_ERG))
        .await
        .unwrap();
    checker.check(&chain, &funded).unwrap();
    chain.apply(&funded);
    let covenant = only_box(&chain, &flash_tree());

    let redeemed = create_redeem_transaction(&ctx, &wallet, &covenant).await.unwrap();
    checker.check(&chain, &redeemed).unwrap();

    // The redeem was accepted but not applied; any further spend of the
    // same instance must be refused.
    let repaid = create_repayment_transaction(&ctx, &wallet, &covenant).await.unwrap();
    assert_eq!(
        checker.check(&chain, &repaid),
        Err(Rejection::Covenant(InvariantError::AlreadyRedeemed))
    );
}

#[tokio::test]
async fn redeem_by_stranger_fails() {
    let owner = test_wallet();
    let stranger = WalletIdentity::from_mnemonic(PHRASE, "other", owner.network()).unwrap();
    let chain = MockChain::with_boxes(100, vec![wallet_box(owner.public_key(), 1, 5 * NANOERG_PER_ERG)]);
    let compiler = StaticCompiler::default();
    let ctx = FlashContext::new(&chain, &compiler, &LocalSigner);

    let funded = create_flash_loan_transaction(&ctx, &owner, &FundingRequest::erg(NANOERG_PER_ERG))
        .await
        .unwrap();
    chain.apply(&funded);
    let covenant = only_box(&chain, &flash_tree());

    let err = create_redeem_transaction(&ctx, &stranger, &covenant).await.unwrap_err();
    assert_eq!(err, WalletError::Sign(SignError::MissingKey { index: 0 }));
    assert_eq!(err.stage(), "signing");
}

#[tokio::test]
async fn unrecognized_covenant_shape_fails_before_fetch() {
    let wallet = test_wallet();
    let chain = MockChain::new(100);
    let compiler = StaticCompiler::default();
    let ctx = FlashContext::new(&chain, &compiler, &LocalSigner);

    let mut bare = wallet_box(wallet.public_key(), 9, NANOERG_PER_ERG);
    bare.ergo_tree = flash_tree();
    let err = create_repayment_transaction(&ctx, &wallet, &bare).await.unwrap_err();
    assert_eq!(
        err,
        WalletError::Invariant(InvariantError::UnrecognizedShape { asset_count: 0 })
    );
    assert_eq!(err.stage(), "covenant");
    assert_eq!(chain.calls(), 0);
}

#[tokio::test]
async fn compiler_failure_stops_pipeline() {
    let wallet = test_wallet();
    let chain = MockChain::with_boxes(100, vec![wallet_box(wallet.public_key(), 1, NANOERG_PER_ERG)]);
    let ctx = FlashContext::new(&chain, &FailingCompiler, &LocalSigner);

    let err = create_pool_transaction(&ctx, &wallet).await.unwrap_err();
    assert_eq!(err, WalletError::Compile(CompileError::Unavailable("node offline".into())));
    assert_eq!(err.stage(), "compile");
    assert_eq!(chain.calls(), 0);
}

#[tokio::test]
async fn provider_failure_is_network_error() {
    let wallet = test_wallet();
    let compiler = StaticCompiler::default();
    let ctx = FlashContext::new(&FailingProvider, &compiler, &LocalSigner);

    let err = create_flash_loan_transaction(&ctx, &wallet, &FundingRequest::erg(NANOERG_PER_ERG))
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::Network(NetworkError::Request(_))));
    assert_eq!(err.stage(), "fetch");
}

#[tokio::test]
async fn compiling_same_policy_twice_is_identical() {
    let compiler = StaticCompiler::default();
    let network = test_wallet().network();
    for policy in [CovenantPolicy::pool(), CovenantPolicy::flash_loan()] {
        let a = compiler.compile(&policy.source(), network).await.unwrap();
        let b = compiler.compile(&policy.source(), network).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }
    assert_eq!(compiler.calls(), 4);
}

#[tokio::test]
async fn unavoidable_dust_change_is_build_error() {
    let wallet = test_wallet();
    let chain = MockChain::with_boxes(
        100,
        vec![wallet_box(wallet.public_key(), 1, MIN_BOX_VALUE + MIN_FEE + 500_000)],
    );
    let compiler = StaticCompiler::default();
    let ctx = FlashContext::new(&chain, &compiler, &LocalSigner);

    let err = create_pool_transaction(&ctx, &wallet).await.unwrap_err();
    assert!(matches!(err, WalletError::Build(_)), "got {err:?}");
    assert_eq!(err.stage(), "assembly");
}

#[tokio::test]
async fn exact_funds_leave_no_change() {
    let wallet = test_wallet();
    let chain = MockChain::with_boxes(
        100,
        vec![
            wallet_box(wallet.public_key(), 1, 600_000),
            wallet_box(wallet.public_key(), 2, MIN_BOX_VALUE + MIN_FEE - 600_000),
        ],
    );
    let compiler = StaticCompiler::default();
    let ctx = FlashContext::new(&chain, &compiler, &LocalSigner);
    let mut checker = checker();

    let tx = create_pool_transaction(&ctx, &wallet).await.unwrap();
    assert_eq!(tx.inputs.len(), 2);
    assert_eq!(tx.outputs.len(), 1);
    checker.check(&chain, &tx).unwrap();
}

#[tokio::test]
async fn redeem_funds_change_for_returned_tokens() {
    let wallet = test_wallet();
    let marker = Token::new(Digest32([0xCC; 32]), 1);
    let shapes = [
        vec![marker.clone()],
        vec![marker.clone(), Token::new(LOAN, 100)],
    ];

    for assets in shapes {
        // The covenant box cannot pay the fee alone; the 100_000 box would
        // cover the deficit exactly but leave nothing for the change box
        // that must carry the returned tokens.
        let covenant = owned_covenant_box(&wallet, MIN_BOX_VALUE, assets.clone());
        let exact = wallet_box(wallet.public_key(), 1, MIN_FEE - MIN_BOX_VALUE);
        let large = wallet_box(wallet.public_key(), 2, 5 * NANOERG_PER_ERG);
        let chain = MockChain::with_boxes(100, vec![covenant.clone(), exact, large.clone()]);
        let compiler = StaticCompiler::default();
        let ctx = FlashContext::new(&chain, &compiler, &LocalSigner);
        let mut checker = checker();

        let redeemed = create_redeem_transaction(&ctx, &wallet, &covenant).await.unwrap();
        let spent: Vec<_> = redeemed.inputs.iter().map(|i| i.box_id).collect();
        assert_eq!(spent, vec![covenant.box_id, large.box_id]);
        assert_eq!(redeemed.outputs.len(), 1);
        assert_eq!(redeemed.outputs[0].value, MIN_BOX_VALUE + large.value - MIN_FEE);
        assert_eq!(redeemed.outputs[0].assets, assets);
        assert_eq!(redeemed.outputs[0].ergo_tree, ErgoTree::p2pk(wallet.public_key()));

        checker.check(&chain, &redeemed).unwrap();
        assert_eq!(checker.state(&marker.token_id), Some(CovenantState::Redeemed));
    }
}

#[tokio::test]
async fn redeem_without_funds_for_change_is_insufficient() {
    let wallet = test_wallet();
    let covenant = owned_covenant_box(
        &wallet,
        MIN_BOX_VALUE,
        vec![Token::new(Digest32([0xCC; 32]), 1), Token::new(LOAN, 100)],
    );
    let exact = wallet_box(wallet.public_key(), 1, MIN_FEE - MIN_BOX_VALUE);
    let chain = MockChain::with_boxes(100, vec![covenant.clone(), exact]);
    let compiler = StaticCompiler::default();
    let ctx = FlashContext::new(&chain, &compiler, &LocalSigner);

    let err = create_redeem_transaction(&ctx, &wallet, &covenant).await.unwrap_err();
    assert_eq!(err, WalletError::InsufficientFunds { shortfall: MIN_BOX_VALUE });
}
