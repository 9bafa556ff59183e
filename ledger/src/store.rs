use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use super::error::{LedgerError, LedgerResult};
use super::game_ledger::GameLedger;
use super::price::{CoinPriceProvider, enrich_holdings};
use super::repository::LedgerRepository;
use super::types::{
    GameId, HoldingId, HoldingView, LedgerPolicy, LedgerSummary, UserId, Valuation,
};

/// Exclusive access to one ledger
pub type LedgerHandle = Arc<Mutex<GameLedger>>;

// Mutations commit by swapping in a validated, persisted draft, so a poisoned
// lock never guards a half-applied change.
fn lock_ledger(handle: &LedgerHandle) -> MutexGuard<'_, GameLedger> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The games of a single user
pub struct UserGameStore {
    user_id: UserId,
    ledgers: HashMap<GameId, LedgerHandle>,
}

impl UserGameStore {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            ledgers: HashMap::new(),
        }
    }

    pub fn find_ledger(&self, game_id: GameId) -> LedgerResult<LedgerHandle> {
        self.ledgers
            .get(&game_id)
            .cloned()
            .ok_or(LedgerError::GameNotFound {
                user_id: self.user_id,
                game_id,
            })
    }

    fn insert(&mut self, ledger: GameLedger) -> LedgerResult<LedgerHandle> {
        let game_id = ledger.game_id();
        if self.ledgers.contains_key(&game_id) {
            return Err(LedgerError::DuplicateGame {
                user_id: self.user_id,
                game_id,
            });
        }
        let handle = Arc::new(Mutex::new(ledger));
        self.ledgers.insert(game_id, handle.clone());
        Ok(handle)
    }

    pub fn game_ids(&self) -> Vec<GameId> {
        let mut ids: Vec<GameId> = self.ledgers.keys().copied().collect();
        ids.sort();
        ids
    }
}

/// Every user's ledgers, shared across request handlers.
///
/// Buys and sells on one ledger are serialized by that ledger's lock and
/// never interleave; different ledgers proceed independently.
pub struct GameStore {
    users: RwLock<HashMap<UserId, UserGameStore>>,
    /// Ledgers being persisted by `create_ledger` but not yet visible
    pending: Mutex<HashSet<(UserId, GameId)>>,
    repository: Arc<dyn LedgerRepository>,
    policy: LedgerPolicy,
}

impl GameStore {
    pub fn new(repository: Arc<dyn LedgerRepository>, policy: LedgerPolicy) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            repository,
            policy,
        }
    }

    /// Builds a store from everything the repository already holds
    pub fn init(repository: Arc<dyn LedgerRepository>, policy: LedgerPolicy) -> LedgerResult<Self> {
        let documents = repository.load_all()?;
        let mut users = HashMap::new();
        let mut games = 0;

        for document in documents {
            let user_store = users
                .entry(document.user_id)
                .or_insert_with(|| UserGameStore::new(document.user_id));
            for ledger in document.games {
                if let Err(e) = ledger.validate() {
                    tracing::error!(user_id = document.user_id, game_id = %ledger.game_id(), error = %e, "Stored ledger is corrupt");
                    return Err(e);
                }
                user_store.insert(ledger)?;
                games += 1;
            }
        }

        tracing::info!(users = users.len(), games, "Game store initialized");

        Ok(Self {
            users: RwLock::new(users),
            pending: Mutex::new(HashSet::new()),
            repository,
            policy,
        })
    }

    /// Writes every ledger back to the repository
    pub fn teardown(&self) -> LedgerResult<()> {
        let handles: Vec<(UserId, LedgerHandle)> = {
            let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
            users
                .values()
                .flat_map(|store| {
                    store
                        .ledgers
                        .values()
                        .map(move |handle| (store.user_id, handle.clone()))
                })
                .collect()
        };

        for (user_id, handle) in &handles {
            let ledger = lock_ledger(handle);
            self.repository.save_game(*user_id, &ledger)?;
        }

        tracing::info!(games = handles.len(), "Game store flushed");
        Ok(())
    }

    pub fn policy(&self) -> LedgerPolicy {
        self.policy
    }

    pub fn find_ledger(&self, user_id: UserId, game_id: GameId) -> LedgerResult<LedgerHandle> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        match users.get(&user_id) {
            Some(store) => store.find_ledger(game_id),
            None => Err(LedgerError::GameNotFound { user_id, game_id }),
        }
    }

    pub fn create_ledger(
        &self,
        user_id: UserId,
        game_id: GameId,
        starting_budget: Decimal,
    ) -> LedgerResult<LedgerSummary> {
        let ledger = GameLedger::new(game_id, starting_budget)?;
        let summary = ledger.summary();

        // The save runs without the users lock; the reservation keeps a
        // concurrent create of the same ledger out meanwhile.
        self.reserve(user_id, game_id)?;
        let created = self
            .repository
            .save_game(user_id, &ledger)
            .map_err(LedgerError::from)
            .and_then(|()| {
                let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
                users
                    .entry(user_id)
                    .or_insert_with(|| UserGameStore::new(user_id))
                    .insert(ledger)
            });
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(user_id, game_id));
        created?;

        tracing::info!(user_id, %game_id, %starting_budget, "Created game ledger");
        Ok(summary)
    }

    fn reserve(&self, user_id: UserId, game_id: GameId) -> LedgerResult<()> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        let exists = users
            .get(&user_id)
            .is_some_and(|store| store.ledgers.contains_key(&game_id));
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if exists || !pending.insert((user_id, game_id)) {
            return Err(LedgerError::DuplicateGame { user_id, game_id });
        }
        Ok(())
    }

    /// Applies `mutate` to a copy of the ledger, persists the copy, and only
    /// then makes it the live state. The ledger lock is held throughout.
    fn apply<T>(
        &self,
        user_id: UserId,
        game_id: GameId,
        mutate: impl FnOnce(&mut GameLedger) -> LedgerResult<T>,
    ) -> LedgerResult<(T, LedgerSummary)> {
        let handle = self.find_ledger(user_id, game_id)?;
        let mut ledger = lock_ledger(&handle);

        let mut draft = ledger.clone();
        let output = mutate(&mut draft)?;

        if let Err(e) = self.repository.save_game(user_id, &draft) {
            tracing::error!(user_id, %game_id, error = %e, "Failed to persist ledger, mutation discarded");
            return Err(e.into());
        }

        *ledger = draft;
        Ok((output, ledger.summary()))
    }

    pub fn buy(
        &self,
        user_id: UserId,
        game_id: GameId,
        coin_id: &str,
        purchase_price: Decimal,
        quantity: Decimal,
    ) -> LedgerResult<LedgerSummary> {
        let policy = self.policy;
        let (holding_id, summary) = self.apply(user_id, game_id, |ledger| {
            ledger
                .buy(coin_id, purchase_price, quantity, &policy)
                .map(|holding| holding.id)
        })?;

        tracing::info!(user_id, %game_id, %holding_id, coin_id, "Buy accepted");
        Ok(summary)
    }

    pub fn sell(
        &self,
        user_id: UserId,
        game_id: GameId,
        holding_id: HoldingId,
        current_price: Decimal,
        quantity: Decimal,
    ) -> LedgerResult<LedgerSummary> {
        let (realized, summary) = self.apply(user_id, game_id, |ledger| {
            ledger.sell(holding_id, current_price, quantity)
        })?;

        tracing::info!(user_id, %game_id, %holding_id, %realized, "Sell accepted");
        Ok(summary)
    }

    pub fn summary(&self, user_id: UserId, game_id: GameId) -> LedgerResult<LedgerSummary> {
        let handle = self.find_ledger(user_id, game_id)?;
        let ledger = lock_ledger(&handle);
        Ok(ledger.summary())
    }

    /// Holdings of a game with live market data attached.
    ///
    /// The holdings are copied under the ledger lock; the provider is called
    /// after the lock is released.
    pub async fn list_holdings(
        &self,
        user_id: UserId,
        game_id: GameId,
        provider: &dyn CoinPriceProvider,
        timeout: Duration,
    ) -> LedgerResult<(Vec<HoldingView>, Valuation)> {
        let (holdings, budget) = {
            let handle = self.find_ledger(user_id, game_id)?;
            let ledger = lock_ledger(&handle);
            (ledger.list_holdings().to_vec(), ledger.budget())
        };

        let views = enrich_holdings(holdings, provider, timeout).await;
        let valuation = Valuation::from_views(budget, &views);
        Ok((views, valuation))
    }

    /// `(game_id, summary)` for every game of the user, ordered by game id
    pub fn games_for_user(&self, user_id: UserId) -> Vec<(GameId, LedgerSummary)> {
        let handles: Vec<(GameId, LedgerHandle)> = {
            let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
            match users.get(&user_id) {
                Some(store) => store
                    .game_ids()
                    .into_iter()
                    .filter_map(|id| store.ledgers.get(&id).map(|h| (id, h.clone())))
                    .collect(),
                None => Vec::new(),
            }
        };

        handles
            .into_iter()
            .map(|(game_id, handle)| (game_id, lock_ledger(&handle).summary()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RepositoryError;
    use crate::price::StaticPriceProvider;
    use crate::repository::{JsonFileRepository, MemoryRepository};
    use crate::types::CoinSnapshot;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use tokio::sync::Notify;
    use uuid::Uuid;

    fn setup_store() -> GameStore {
        GameStore::new(Arc::new(MemoryRepository::new()), LedgerPolicy::default())
    }

    // Memory repository whose saves can be made to fail on demand
    #[derive(Default)]
    struct FlakyRepository {
        inner: MemoryRepository,
        failing: AtomicBool,
    }

    impl LedgerRepository for FlakyRepository {
        fn load_all(&self) -> Result<Vec<crate::repository::UserDocument>, RepositoryError> {
            self.inner.load_all()
        }

        fn save_game(&self, user_id: UserId, ledger: &GameLedger) -> Result<(), RepositoryError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(RepositoryError::Backend("disk full".to_string()));
            }
            self.inner.save_game(user_id, ledger)
        }
    }

    // Holds saves for one user until the test lets them through
    struct GatedRepository {
        inner: MemoryRepository,
        gated_user: UserId,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl LedgerRepository for GatedRepository {
        fn load_all(&self) -> Result<Vec<crate::repository::UserDocument>, RepositoryError> {
            self.inner.load_all()
        }

        fn save_game(&self, user_id: UserId, ledger: &GameLedger) -> Result<(), RepositoryError> {
            if user_id == self.gated_user {
                self.entered.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            self.inner.save_game(user_id, ledger)
        }
    }

    // Answers every lookup only after the test releases it
    struct GatedProvider {
        inner: StaticPriceProvider,
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl CoinPriceProvider for GatedProvider {
        async fn get_coin(&self, coin_id: &str) -> Result<CoinSnapshot, crate::PriceError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.get_coin(coin_id).await
        }
    }

    #[test]
    fn test_create_and_find_ledger() {
        let store = setup_store();
        let game_id = Uuid::new_v4();

        let summary = store.create_ledger(1, game_id, dec!(1000)).unwrap();
        assert_eq!(summary.budget, dec!(1000));
        assert_eq!(summary.num_transactions, 0);
        assert_eq!(summary.num_coins, 0);

        let handle = store.find_ledger(1, game_id).unwrap();
        assert_eq!(handle.lock().unwrap().game_id(), game_id);
    }

    #[test]
    fn test_create_duplicate_ledger_fails() {
        let store = setup_store();
        let game_id = Uuid::new_v4();
        store.create_ledger(1, game_id, dec!(1000)).unwrap();

        let result = store.create_ledger(1, game_id, dec!(5));
        assert!(matches!(
            result,
            Err(LedgerError::DuplicateGame { user_id: 1, game_id: g }) if g == game_id
        ));
        assert_eq!(store.summary(1, game_id).unwrap().budget, dec!(1000));

        // Same game for another user is a separate ledger
        store.create_ledger(2, game_id, dec!(5)).unwrap();
        assert_eq!(store.summary(2, game_id).unwrap().budget, dec!(5));
    }

    #[test]
    fn test_find_missing_ledger() {
        let store = setup_store();
        let game_id = Uuid::new_v4();
        store.create_ledger(1, game_id, dec!(1000)).unwrap();

        assert!(matches!(
            store.find_ledger(2, game_id),
            Err(LedgerError::GameNotFound { user_id: 2, .. })
        ));
        assert!(matches!(
            store.find_ledger(1, Uuid::new_v4()),
            Err(LedgerError::GameNotFound { user_id: 1, .. })
        ));
        assert!(matches!(
            store.buy(1, Uuid::new_v4(), "btc", dec!(1), dec!(1)),
            Err(LedgerError::GameNotFound { .. })
        ));
    }

    #[test]
    fn test_buy_and_sell_through_store() {
        let store = setup_store();
        let game_id = Uuid::new_v4();
        store.create_ledger(1, game_id, dec!(1000)).unwrap();

        let summary = store.buy(1, game_id, "btc", dec!(5), dec!(10)).unwrap();
        assert_eq!(summary.budget, dec!(950));
        assert_eq!(summary.num_coins, 1);

        let holding_id = {
            let handle = store.find_ledger(1, game_id).unwrap();
            let ledger = handle.lock().unwrap();
            ledger.list_holdings()[0].id
        };

        let summary = store.sell(1, game_id, holding_id, dec!(8), dec!(4)).unwrap();
        assert_eq!(summary.budget, dec!(962));
        assert_eq!(summary.num_transactions, 2);

        let summary = store.sell(1, game_id, holding_id, dec!(3), dec!(6)).unwrap();
        assert_eq!(
            summary,
            LedgerSummary {
                budget: dec!(950),
                num_transactions: 3,
                num_coins: 0,
            }
        );
    }

    #[test]
    fn test_failed_sell_does_not_count() {
        let store = setup_store();
        let game_id = Uuid::new_v4();
        store.create_ledger(1, game_id, dec!(1000)).unwrap();
        store.buy(1, game_id, "btc", dec!(5), dec!(10)).unwrap();

        let result = store.sell(1, game_id, Uuid::new_v4(), dec!(8), dec!(1));
        assert!(matches!(result, Err(LedgerError::HoldingNotFound(_))));

        let summary = store.summary(1, game_id).unwrap();
        assert_eq!(summary.num_transactions, 1);
        assert_eq!(summary.budget, dec!(950));
    }

    #[test]
    fn test_persistence_failure_leaves_state_unchanged() {
        let repo = Arc::new(FlakyRepository::default());
        let store = GameStore::new(repo.clone(), LedgerPolicy::default());
        let game_id = Uuid::new_v4();
        store.create_ledger(1, game_id, dec!(1000)).unwrap();
        store.buy(1, game_id, "btc", dec!(5), dec!(10)).unwrap();
        let before = store.find_ledger(1, game_id).unwrap().lock().unwrap().clone();

        repo.failing.store(true, Ordering::SeqCst);
        let holding_id = before.list_holdings()[0].id;

        assert!(matches!(
            store.buy(1, game_id, "eth", dec!(1), dec!(1)),
            Err(LedgerError::Persistence(_))
        ));
        assert!(matches!(
            store.sell(1, game_id, holding_id, dec!(9), dec!(10)),
            Err(LedgerError::Persistence(_))
        ));
        assert!(matches!(
            store.create_ledger(1, Uuid::new_v4(), dec!(10)),
            Err(LedgerError::Persistence(_))
        ));

        let after = store.find_ledger(1, game_id).unwrap().lock().unwrap().clone();
        assert_eq!(after, before);
        assert_eq!(store.games_for_user(1).len(), 1);

        // The repository still holds the last committed state
        let docs = repo.inner.load_all().unwrap();
        assert_eq!(docs[0].games, vec![before]);
    }

    #[test]
    fn test_games_for_user_sorted() {
        let store = setup_store();
        let mut ids = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        for id in &ids {
            store.create_ledger(3, *id, dec!(100)).unwrap();
        }
        ids.sort();

        let games = store.games_for_user(3);
        assert_eq!(games.iter().map(|(id, _)| *id).collect::<Vec<_>>(), ids);
        assert!(store.games_for_user(4).is_empty());
    }

    #[test]
    fn test_init_and_teardown_round_trip() {
        let dir = std::env::temp_dir().join(format!("ledger-store-{}", Uuid::new_v4()));
        let game_id = Uuid::new_v4();

        {
            let repo = Arc::new(JsonFileRepository::open(&dir).unwrap());
            let store = GameStore::init(repo, LedgerPolicy::default()).unwrap();
            store.create_ledger(9, game_id, dec!(1000)).unwrap();
            store.buy(9, game_id, "btc", dec!(5), dec!(10)).unwrap();
            store.teardown().unwrap();
        }

        let repo = Arc::new(JsonFileRepository::open(&dir).unwrap());
        let store = GameStore::init(repo, LedgerPolicy::default()).unwrap();
        let summary = store.summary(9, game_id).unwrap();
        assert_eq!(summary.budget, dec!(950));
        assert_eq!(summary.num_transactions, 1);
        assert_eq!(summary.num_coins, 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_list_holdings_with_market_data() {
        let store = setup_store();
        let game_id = Uuid::new_v4();
        store.create_ledger(1, game_id, dec!(1000)).unwrap();
        store.buy(1, game_id, "btc", dec!(5), dec!(10)).unwrap();
        store.buy(1, game_id, "delisted", dec!(2), dec!(5)).unwrap();

        let provider = StaticPriceProvider::with_coins([CoinSnapshot {
            coin_id: "btc".to_string(),
            price: dec!(8),
            market_cap: dec!(100),
            supply: dec!(10),
            seven_day_change: dec!(-3.2),
        }]);

        let (views, valuation) = store
            .list_holdings(1, game_id, &provider, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(views.len(), 2);
        assert_eq!(views[0].holding.coin_id, "btc");
        assert_eq!(views[0].market.as_ref().unwrap().price, dec!(8));
        assert!(views[1].market.is_none());
        assert!(views[1].unavailable.is_some());

        assert_eq!(valuation.budget, dec!(940));
        assert_eq!(valuation.cost_basis, dec!(60));
        assert_eq!(valuation.market_value, dec!(80));
        assert_eq!(valuation.unrealized_pnl, dec!(30));
        assert_eq!(valuation.equity, dec!(1020));
        assert_eq!(valuation.unpriced_holdings, 1);

        // Listing is read-only
        assert_eq!(store.summary(1, game_id).unwrap().num_transactions, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_buys_and_sells_are_linearizable() {
        let store = Arc::new(setup_store());
        let game_id = Uuid::new_v4();
        store.create_ledger(1, game_id, dec!(100000)).unwrap();

        // Lots to sell from, one unit each sold 3 times out of 10 units
        let mut lots = Vec::new();
        for _ in 0..10 {
            store.buy(1, game_id, "btc", dec!(10), dec!(10)).unwrap();
        }
        {
            let handle = store.find_ledger(1, game_id).unwrap();
            let ledger = handle.lock().unwrap();
            lots.extend(ledger.list_holdings().iter().map(|h| h.id));
        }

        let buys = 200;
        let mut tasks = Vec::new();
        for i in 0..buys {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let coin = if i % 2 == 0 { "eth" } else { "sol" };
                store.buy(1, game_id, coin, dec!(2), dec!(3)).map(|_| ())
            }));
        }
        for (i, lot) in lots.iter().enumerate() {
            for _ in 0..3 {
                let store = store.clone();
                let lot = *lot;
                let price = Decimal::from(10 + i as i64);
                tasks.push(tokio::spawn(async move {
                    store.sell(1, game_id, lot, price, dec!(1)).map(|_| ())
                }));
            }
        }

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // 10 lots bought at 10 x 10 = 1000, 200 buys at 6, each lot i sold 3 units at 10 + i
        let realized: Decimal = (0..10).map(|i| Decimal::from(3 * i)).sum();
        let expected_budget = dec!(100000) - dec!(1000) - dec!(6) * Decimal::from(buys) + realized;

        let summary = store.summary(1, game_id).unwrap();
        assert_eq!(summary.num_transactions, 10 + buys as u64 + 30);
        assert_eq!(summary.budget, expected_budget);
        assert_eq!(summary.num_coins, 10 + buys);

        let handle = store.find_ledger(1, game_id).unwrap();
        let ledger = handle.lock().unwrap();
        for lot in &lots {
            assert_eq!(ledger.get_holding(*lot).unwrap().quantity, dec!(7));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_overselling_rejects_excess() {
        let store = Arc::new(setup_store());
        let game_id = Uuid::new_v4();
        store.create_ledger(1, game_id, dec!(1000)).unwrap();
        store.buy(1, game_id, "btc", dec!(5), dec!(10)).unwrap();
        let lot = store.find_ledger(1, game_id).unwrap().lock().unwrap().list_holdings()[0].id;

        // 25 sells of one unit against 10 units: exactly 10 succeed
        let mut tasks = Vec::new();
        for _ in 0..25 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.sell(1, game_id, lot, dec!(6), dec!(1))
            }));
        }

        let mut accepted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(LedgerError::HoldingNotFound(_)) | Err(LedgerError::InsufficientQuantity { .. }) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(accepted, 10);
        let summary = store.summary(1, game_id).unwrap();
        assert_eq!(summary.num_transactions, 11);
        assert_eq!(summary.num_coins, 0);
        assert_eq!(summary.budget, dec!(960));
    }

    #[test]
    fn test_create_ledger_saves_outside_store_lock() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let repo = Arc::new(GatedRepository {
            inner: MemoryRepository::new(),
            gated_user: 2,
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let store = GameStore::new(repo, LedgerPolicy::default());
        let game_id = Uuid::new_v4();
        store.create_ledger(1, game_id, dec!(1000)).unwrap();

        std::thread::scope(|scope| {
            let creating = scope.spawn(|| store.create_ledger(2, game_id, dec!(500)));
            entered_rx.recv().unwrap();

            // User 2's save is stuck; user 1 is not
            store.buy(1, game_id, "btc", dec!(5), dec!(10)).unwrap();
            assert_eq!(store.summary(1, game_id).unwrap().budget, dec!(950));

            // Not visible yet, and cannot be created twice
            assert!(matches!(
                store.find_ledger(2, game_id),
                Err(LedgerError::GameNotFound { .. })
            ));
            assert!(matches!(
                store.create_ledger(2, game_id, dec!(7)),
                Err(LedgerError::DuplicateGame { .. })
            ));

            release_tx.send(()).unwrap();
            creating.join().unwrap().unwrap();
        });

        assert_eq!(store.summary(2, game_id).unwrap().budget, dec!(500));
    }

    #[test]
    fn test_failed_create_can_be_retried() {
        let repo = Arc::new(FlakyRepository::default());
        let store = GameStore::new(repo.clone(), LedgerPolicy::default());
        let game_id = Uuid::new_v4();

        repo.failing.store(true, Ordering::SeqCst);
        assert!(matches!(
            store.create_ledger(1, game_id, dec!(10)),
            Err(LedgerError::Persistence(_))
        ));

        repo.failing.store(false, Ordering::SeqCst);
        store.create_ledger(1, game_id, dec!(10)).unwrap();
        assert_eq!(store.summary(1, game_id).unwrap().budget, dec!(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_list_holdings_releases_ledger_during_lookup() {
        let store = Arc::new(setup_store());
        let game_id = Uuid::new_v4();
        store.create_ledger(1, game_id, dec!(1000)).unwrap();
        store.buy(1, game_id, "btc", dec!(5), dec!(10)).unwrap();

        let provider = Arc::new(GatedProvider {
            inner: StaticPriceProvider::with_coins([CoinSnapshot {
                coin_id: "btc".to_string(),
                price: dec!(6),
                market_cap: dec!(100),
                supply: dec!(10),
                seven_day_change: Decimal::ZERO,
            }]),
            entered: Notify::new(),
            release: Notify::new(),
        });

        let listing = {
            let store = store.clone();
            let provider = provider.clone();
            tokio::spawn(async move {
                store
                    .list_holdings(1, game_id, provider.as_ref(), Duration::from_secs(5))
                    .await
            })
        };
        provider.entered.notified().await;

        // The lookup is in flight and the ledger is free
        let handle = store.find_ledger(1, game_id).unwrap();
        assert!(handle.try_lock().is_ok());
        store.buy(1, game_id, "eth", dec!(2), dec!(5)).unwrap();

        provider.release.notify_one();
        let (views, valuation) = listing.await.unwrap().unwrap();

        // The listing reflects the ledger as it was when it was copied
        assert_eq!(views.len(), 1);
        assert_eq!(valuation.budget, dec!(950));
        assert_eq!(valuation.market_value, dec!(60));
        assert_eq!(store.summary(1, game_id).unwrap().num_coins, 2);
    }

    #[test]
    fn test_init_rejects_corrupt_ledger() {
        let repo = Arc::new(MemoryRepository::new());
        let mut ledger = GameLedger::new(Uuid::new_v4(), dec!(100)).unwrap();
        ledger
            .buy("btc", dec!(5), dec!(2), &LedgerPolicy::default())
            .unwrap();

        let mut value = serde_json::to_value(&ledger).unwrap();
        value["holdings"][0]["quantity"] = serde_json::json!("-1");
        let corrupt: GameLedger = serde_json::from_value(value).unwrap();
        repo.save_game(4, &corrupt).unwrap();

        assert!(matches!(
            GameStore::init(repo, LedgerPolicy::default()),
            Err(LedgerError::InvalidAmount {
                field: "quantity",
                ..
            })
        ));
    }
}
