use std::time::Duration;

use crypto_devs_mint::phase::Cadence;
use crypto_devs_mint::sim::{SimulatedSale, PRESALE_DURATION_SECS};
use crypto_devs_mint::{
    Affordance, ClientConfig, ClientError, MintClient, PollerState, ToastKind, UiPhase,
    UserAction,
};

fn client(sale: &SimulatedSale) -> MintClient {
    let _ = tracing_subscriber::fmt::try_init();
    let mut config = ClientConfig::default();
    config.contract.address = sale.wallet.contract_address();
    MintClient::new(config, sale.wallet.clone(), sale.clock.clone()).unwrap()
}

async fn next_ticks() {
    tokio::time::sleep(Duration::from_millis(5_100)).await;
}

#[tokio::test(start_paused = true)]
async fn full_sale_from_connect_to_public_mint() {
    let sale = SimulatedSale::with_defaults();
    let client = client(&sale);
    let mut toasts = client.subscribe_notifications();
    client.start();
    assert_eq!(client.view().phase, UiPhase::Disconnected);
    assert_eq!(client.phase().poller_state(), PollerState::Idle);

    client.handle(UserAction::Connect).await.unwrap();
    next_ticks().await;
    assert_eq!(client.phase().poller_state(), PollerState::Polling);
    let view = client.view();
    assert_eq!(view.affordance, Affordance::StartPresale);
    assert_eq!(view.headline, "0/20 have been minted");

    client.handle(UserAction::StartPresale).await.unwrap();
    assert_eq!(client.view().phase, UiPhase::PresaleOpen);
    assert_eq!(toasts.recv().await.unwrap().message, "Presale started!");

    sale.wallet.select_account(sale.buyers[0]);
    client.handle(UserAction::PresaleMint).await.unwrap();
    assert_eq!(client.phase().snapshot().tokens_minted, 1);
    assert_eq!(
        toasts.recv().await.unwrap().message,
        "You have successfully minted a Crypto Dev!"
    );

    // Not on the whitelist: the ledger refuses, nothing is minted.
    sale.wallet.select_account(sale.buyers[2]);
    let err = client.handle(UserAction::PresaleMint).await.unwrap_err();
    assert!(err.to_string().contains("not whitelisted"), "{err}");
    assert_eq!(toasts.recv().await.unwrap().kind, ToastKind::Error);
    assert_eq!(client.phase().snapshot().tokens_minted, 1);

    sale.clock.advance(PRESALE_DURATION_SECS);
    next_ticks().await;
    assert_eq!(client.view().affordance, Affordance::PublicMint);
    assert_eq!(client.phase().poller_state(), PollerState::Stopped);

    let phase_polls = client.phase().stats(Cadence::Phase).started;
    client.handle(UserAction::PublicMint).await.unwrap();
    next_ticks().await;
    next_ticks().await;
    assert_eq!(client.view().headline, "2/20 have been minted");
    assert_eq!(client.phase().stats(Cadence::Phase).started, phase_polls);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn sale_sells_out() {
    let sale = SimulatedSale::with_defaults();
    let client = client(&sale);
    client.start();
    client.connect().await.unwrap();
    sale.start_presale_directly();
    sale.clock.advance(PRESALE_DURATION_SECS);
    for _ in 0..19 {
        assert!(sale.mint_directly(sale.buyers[1]).is_some());
    }
    next_ticks().await;
    assert_eq!(client.view().affordance, Affordance::PublicMint);

    client.handle(UserAction::PublicMint).await.unwrap();
    let view = client.view();
    assert_eq!(view.affordance, Affordance::SoldOut);
    assert_eq!(view.affordance.action(), None);

    let err = client.dispatcher().public_mint().await.unwrap_err();
    assert!(matches!(err, ClientError::WriteFailure { .. }));
    assert!(err.to_string().contains("maximum"), "{err}");
    assert_eq!(sale.wallet.ledger(|ledger| ledger.token_ids()), 20);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn flaky_reads_converge() {
    let sale = SimulatedSale::with_defaults();
    sale.wallet.set_read_failure_rate(0.3, 11);
    let client = client(&sale);
    client.start();
    client.connect().await.unwrap();
    sale.start_presale_directly();
    for _ in 0..3 {
        sale.mint_directly(sale.buyers[0]);
    }
    sale.clock.advance(PRESALE_DURATION_SECS);

    let mut state = client.subscribe_state();
    tokio::time::timeout(
        Duration::from_secs(300),
        state.wait_for(|s| s.presale_ended && s.tokens_minted == 3),
    )
    .await
    .expect("state converges despite failing reads")
    .unwrap();
    assert_eq!(client.view().phase, UiPhase::PublicOpen);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn switching_network_blocks_until_switched_back() {
    let sale = SimulatedSale::with_defaults();
    let client = client(&sale);
    client.start();
    client.connect().await.unwrap();
    next_ticks().await;
    let mut toasts = client.subscribe_notifications();

    sale.wallet.switch_chain(1);
    sale.start_presale_directly();
    next_ticks().await;
    assert_eq!(toasts.recv().await.unwrap().kind, ToastKind::Warning);
    assert!(!client.phase().snapshot().presale_started);
    assert!(client
        .handle(UserAction::StartPresale)
        .await
        .unwrap_err()
        .is_wrong_network());

    sale.wallet.switch_chain(4);
    next_ticks().await;
    assert!(client.phase().snapshot().presale_started);

    client.shutdown().await;
}
