use crate::{
    entities::commerce::{cart, cart_item, CartModel, CartStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    models::ItemOptions,
    repositories::cart_repository::{CartRepository, LineChange},
    services::commerce::pricing_service::{line_total, PricingService},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Shopping cart service.
///
/// Every mutation runs as read / apply-in-memory / version-checked write:
///
/// 1. load the cart row and its lines inside a transaction,
/// 2. apply the change to the in-memory copy and reprice it,
/// 3. `UPDATE carts ... WHERE id = ? AND version = ?`.
///
/// A write that matches no row means another request changed the cart in
/// between; the transaction is rolled back and the whole cycle is retried up
/// to `max_retries` times before surfacing `ConcurrentModification`.
///
/// # Examples
///
/// ```ignore
/// let cart = cart_service
///     .create_cart(CartOwner::Session(token), None)
///     .await?;
///
/// let cart = cart_service
///     .add_item(cart.cart.id, NewCartLine {
///         menu_item_id,
///         restaurant_id,
///         name: "Margherita".into(),
///         unit_price: dec!(12.50),
///         quantity: 2,
///         options: ItemOptions::new(),
///     })
///     .await?;
/// ```
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    pricing: PricingService,
    max_retries: u32,
}

/// Who a cart belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum CartOwner {
    Session(String),
    Customer(Uuid),
}

/// A menu item to put in a cart, with name and price as currently listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCartLine {
    pub menu_item_id: Uuid,
    pub restaurant_id: Uuid,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    #[serde(default)]
    pub options: ItemOptions,
}

/// Cart with items
#[derive(Debug, Clone, Serialize)]
pub struct CartWithItems {
    pub cart: CartModel,
    pub items: Vec<cart_item::Model>,
}

impl CartWithItems {
    pub fn item_count(&self) -> i32 {
        self.items.iter().map(|i| i.quantity).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub cart: CartWithItems,
    /// The guest cart was reassigned to the customer instead of folded in.
    pub promoted: bool,
    /// Guest lines were dropped because they came from a different restaurant.
    pub discarded_guest_items: bool,
}

impl CartService {
    /// Creates a new `CartService` instance.
    ///
    /// # Arguments
    ///
    /// * `db` - Database connection pool
    /// * `event_sender` - Event sender for publishing cart events
    /// * `pricing` - Calculator used to reprice the cart after each change
    /// * `max_retries` - Attempts for a version-checked write
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        pricing: PricingService,
        max_retries: u32,
    ) -> Self {
        Self {
            db,
            event_sender,
            pricing,
            max_retries: max_retries.max(1),
        }
    }

    /// Creates an empty, active cart.
    ///
    /// # Arguments
    ///
    /// * `owner` - Session token for guests, customer id once logged in
    /// * `restaurant_id` - Optional restaurant to bind up front
    #[instrument(skip(self))]
    pub async fn create_cart(
        &self,
        owner: CartOwner,
        restaurant_id: Option<Uuid>,
    ) -> Result<CartWithItems, ServiceError> {
        let (session_id, customer_id) = match owner {
            CartOwner::Session(token) => {
                if token.trim().is_empty() {
                    return Err(ServiceError::InvalidInput(
                        "session token must not be blank".to_string(),
                    ));
                }
                (Some(token), None)
            }
            CartOwner::Customer(id) => (None, Some(id)),
        };

        let now = Utc::now();
        let cart = CartRepository::insert(
            &*self.db,
            CartModel {
                id: Uuid::new_v4(),
                session_id,
                customer_id,
                restaurant_id,
                subtotal: Decimal::ZERO,
                tax_total: Decimal::ZERO,
                delivery_fee: Decimal::ZERO,
                total: Decimal::ZERO,
                status: CartStatus::Active,
                version: 1,
                created_at: now,
                updated_at: now,
            },
        )
        .await?;

        self.event_sender
            .send_or_log(Event::CartCreated(cart.id))
            .await;

        info!(cart_id = %cart.id, "Created cart");
        Ok(CartWithItems {
            cart,
            items: Vec::new(),
        })
    }

    /// Retrieves a cart with all its items.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, cart_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let (cart, items) = CartRepository::new(self.db.clone())
            .find_with_items(cart_id)
            .await?
            .ok_or(ServiceError::CartNotFound(cart_id))?;
        Ok(CartWithItems { cart, items })
    }

    /// The customer's active cart as stored, ignoring any session binding.
    #[instrument(skip(self))]
    pub async fn find_active_customer_cart(
        &self,
        customer_id: Uuid,
    ) -> Result<Option<CartWithItems>, ServiceError> {
        let repository = CartRepository::new(self.db.clone());
        let Some(cart) = repository.find_active_by_customer(customer_id).await? else {
            return Ok(None);
        };
        let items = CartRepository::items_in(&*self.db, cart.id).await?;
        Ok(Some(CartWithItems { cart, items }))
    }

    /// Adds a menu item to the cart.
    ///
    /// The first item binds the cart to its restaurant. Adding the same menu
    /// item with equal options again increases that line's quantity.
    ///
    /// # Returns
    ///
    /// * `Ok(CartWithItems)` - Updated cart with recalculated totals
    /// * `Err(ServiceError::InvalidQuantity)` - `quantity <= 0`
    /// * `Err(ServiceError::RestaurantMismatch)` - Cart holds another restaurant's items
    /// * `Err(ServiceError::CartNotFound)` / `CartNotActive`
    #[instrument(skip(self, line), fields(menu_item_id = %line.menu_item_id, quantity = line.quantity))]
    pub async fn add_item(
        &self,
        cart_id: Uuid,
        line: NewCartLine,
    ) -> Result<CartWithItems, ServiceError> {
        validate_new_line(&line)?;

        let updated = self
            .mutate(cart_id, |cart, lines, now| {
                apply_add(cart, lines, line.clone(), now).map(|change| vec![change])
            })
            .await?;

        self.event_sender
            .send_or_log(Event::CartUpdated(cart_id))
            .await;

        info!(
            %cart_id,
            menu_item_id = %line.menu_item_id,
            quantity = line.quantity,
            total = %updated.cart.total,
            "Added item to cart"
        );
        Ok(updated)
    }

    /// Sets a line's quantity. Zero removes the line.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::InvalidQuantity(quantity));
        }

        let updated = self
            .mutate(cart_id, |_, lines, now| {
                apply_update(lines, item_id, quantity, now).map(|change| vec![change])
            })
            .await?;

        self.event_sender
            .send_or_log(Event::CartUpdated(cart_id))
            .await;
        Ok(updated)
    }

    /// Removes a line. Removing a line that is not there is not an error.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
    ) -> Result<CartWithItems, ServiceError> {
        let updated = self
            .mutate(cart_id, |_, lines, _| {
                Ok(apply_remove(lines, item_id).into_iter().collect())
            })
            .await?;

        self.event_sender
            .send_or_log(Event::CartUpdated(cart_id))
            .await;
        Ok(updated)
    }

    /// Empties the cart and unbinds its restaurant.
    ///
    /// Returns `Ok(None)` when the cart does not exist.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, cart_id: Uuid) -> Result<Option<CartWithItems>, ServiceError> {
        let result = self
            .mutate(cart_id, |cart, lines, _| {
                cart.restaurant_id = None;
                Ok(lines.drain(..).map(|line| LineChange::Delete(line.id)).collect())
            })
            .await;

        match result {
            Ok(cleared) => {
                self.event_sender
                    .send_or_log(Event::CartCleared(cart_id))
                    .await;
                info!(%cart_id, "Cleared cart");
                Ok(Some(cleared))
            }
            Err(ServiceError::CartNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Folds a guest cart into a customer's cart.
    ///
    /// Without a customer cart the guest cart is promoted: reassigned to the
    /// customer in place. Otherwise guest lines are unioned into the customer
    /// cart (quantities summed for identical configurations) and the guest
    /// cart is retired as `Merged`.
    ///
    /// When both carts hold items from different restaurants the customer's
    /// cart is kept as is, the guest lines are dropped and
    /// `discarded_guest_items` is set on the outcome.
    #[instrument(skip(self))]
    pub async fn merge_carts(
        &self,
        guest_cart_id: Uuid,
        user_cart_id: Option<Uuid>,
        customer_id: Uuid,
    ) -> Result<MergeOutcome, ServiceError> {
        let outcome = match user_cart_id {
            Some(user_cart_id) if user_cart_id != guest_cart_id => {
                self.fold_into(guest_cart_id, user_cart_id, customer_id)
                    .await?
            }
            _ => {
                let cart = self
                    .mutate(guest_cart_id, |cart, _, _| {
                        ensure_claimable(cart, customer_id)?;
                        cart.customer_id = Some(customer_id);
                        cart.session_id = None;
                        Ok(Vec::new())
                    })
                    .await?;
                MergeOutcome {
                    cart,
                    promoted: true,
                    discarded_guest_items: false,
                }
            }
        };

        self.event_sender
            .send_or_log(Event::CartMerged {
                guest_cart_id,
                target_cart_id: outcome.cart.cart.id,
                customer_id,
                discarded_guest_items: outcome.discarded_guest_items,
            })
            .await;

        if outcome.discarded_guest_items {
            warn!(%guest_cart_id, target_cart_id = %outcome.cart.cart.id, "Guest items from another restaurant were discarded during merge");
        }
        info!(%guest_cart_id, target_cart_id = %outcome.cart.cart.id, promoted = outcome.promoted, "Merged carts");
        Ok(outcome)
    }

    async fn fold_into(
        &self,
        guest_cart_id: Uuid,
        user_cart_id: Uuid,
        customer_id: Uuid,
    ) -> Result<MergeOutcome, ServiceError> {
        for attempt in 1..=self.max_retries {
            let txn = self.db.begin().await?;

            let guest = CartRepository::find_in(&txn, guest_cart_id)
                .await?
                .ok_or(ServiceError::CartNotFound(guest_cart_id))?;
            let user = CartRepository::find_in(&txn, user_cart_id)
                .await?
                .ok_or(ServiceError::CartNotFound(user_cart_id))?;

            ensure_claimable(&guest, customer_id)?;
            if !user.is_owned_by_customer(customer_id) {
                return Err(ServiceError::Forbidden(format!(
                    "cart {} does not belong to the customer",
                    user_cart_id
                )));
            }
            if !user.is_active() {
                return Err(ServiceError::CartNotActive(user_cart_id));
            }

            let guest_lines = CartRepository::items_in(&txn, guest_cart_id).await?;
            let mut user_lines = CartRepository::items_in(&txn, user_cart_id).await?;
            let now = Utc::now();

            let mut user_next = user.clone();
            let mut changes = Vec::new();
            let mut discarded = false;

            if let Some(guest_restaurant) = guest
                .restaurant_id
                .or_else(|| guest_lines.first().map(|l| l.restaurant_id))
            {
                let same_restaurant = user_next.restaurant_id == Some(guest_restaurant);
                if !guest_lines.is_empty() && !user_lines.is_empty() && !same_restaurant {
                    discarded = true;
                } else if !guest_lines.is_empty() {
                    user_next.restaurant_id = Some(guest_restaurant);
                    changes = merge_lines(user_cart_id, &mut user_lines, &guest_lines, now)?;
                }
            }

            if !changes.is_empty() {
                self.reprice(&mut user_next, &user_lines, now);
            }

            let mut guest_next = guest.clone();
            guest_next.status = CartStatus::Merged;
            guest_next.version += 1;
            guest_next.updated_at = now;

            // Lock rows in id order so two merges touching the same carts cannot deadlock.
            let mut writes = vec![(&guest_next, guest.version)];
            if user_next != user {
                writes.push((&user_next, user.version));
            }
            writes.sort_by_key(|(cart, _)| cart.id);

            let mut all_applied = true;
            for (next, expected) in writes {
                if !CartRepository::update_versioned(&txn, next, expected).await? {
                    all_applied = false;
                    break;
                }
            }
            if !all_applied {
                txn.rollback().await?;
                counter!("orderflow.carts.version_conflicts", 1);
                warn!(%guest_cart_id, %user_cart_id, attempt, "Cart merge lost a version race, retrying");
                continue;
            }

            CartRepository::apply_line_changes(&txn, &changes).await?;
            txn.commit().await?;

            return Ok(MergeOutcome {
                cart: CartWithItems {
                    cart: user_next,
                    items: user_lines,
                },
                promoted: false,
                discarded_guest_items: discarded,
            });
        }

        Err(ServiceError::ConcurrentModification(user_cart_id))
    }

    /// Runs one version-checked read-modify-write cycle, retrying on conflict.
    ///
    /// `apply` mutates the in-memory cart and lines and returns the line
    /// changes to persist. When neither the cart row nor any line changed,
    /// nothing is written and the current state is returned.
    async fn mutate<F>(&self, cart_id: Uuid, mut apply: F) -> Result<CartWithItems, ServiceError>
    where
        F: FnMut(
                &mut CartModel,
                &mut Vec<cart_item::Model>,
                DateTime<Utc>,
            ) -> Result<Vec<LineChange>, ServiceError>
            + Send,
    {
        for attempt in 1..=self.max_retries {
            let txn = self.db.begin().await?;

            let current = CartRepository::find_in(&txn, cart_id)
                .await?
                .ok_or(ServiceError::CartNotFound(cart_id))?;
            if current.status.is_retired() {
                return Err(ServiceError::CartNotActive(cart_id));
            }

            let mut lines = CartRepository::items_in(&txn, cart_id).await?;
            let now = Utc::now();
            let mut next = current.clone();
            let changes = apply(&mut next, &mut lines, now)?;

            if changes.is_empty() && next == current {
                txn.rollback().await?;
                return Ok(CartWithItems {
                    cart: current,
                    items: lines,
                });
            }

            self.reprice(&mut next, &lines, now);

            if !CartRepository::update_versioned(&txn, &next, current.version).await? {
                txn.rollback().await?;
                counter!("orderflow.carts.version_conflicts", 1);
                warn!(%cart_id, attempt, "Cart version changed underneath, retrying");
                continue;
            }

            CartRepository::apply_line_changes(&txn, &changes).await?;
            txn.commit().await?;

            return Ok(CartWithItems {
                cart: next,
                items: lines,
            });
        }

        Err(ServiceError::ConcurrentModification(cart_id))
    }

    fn reprice(&self, cart: &mut CartModel, lines: &[cart_item::Model], now: DateTime<Utc>) {
        apply_totals(cart, lines, &self.pricing, now);
    }
}

/// Recalculates cart totals from `lines` and advances the version. An empty
/// cart is unbound from its restaurant first.
pub fn apply_totals(
    cart: &mut CartModel,
    lines: &[cart_item::Model],
    pricing: &PricingService,
    now: DateTime<Utc>,
) {
    if lines.is_empty() {
        cart.restaurant_id = None;
    }
    let totals = pricing.cart_totals(cart.restaurant_id, lines);
    cart.subtotal = totals.subtotal;
    cart.tax_total = totals.tax;
    cart.delivery_fee = totals.delivery_fee;
    cart.total = totals.total;
    cart.version += 1;
    cart.updated_at = now;
}

fn ensure_claimable(guest: &CartModel, customer_id: Uuid) -> Result<(), ServiceError> {
    if let Some(owner) = guest.customer_id {
        if owner != customer_id {
            return Err(ServiceError::Forbidden(format!(
                "cart {} belongs to another customer",
                guest.id
            )));
        }
    }
    if !guest.is_active() {
        return Err(ServiceError::CartNotActive(guest.id));
    }
    Ok(())
}

/// Checks a line before it touches storage.
pub fn validate_new_line(line: &NewCartLine) -> Result<(), ServiceError> {
    if line.quantity <= 0 {
        return Err(ServiceError::InvalidQuantity(line.quantity));
    }
    if line.unit_price < Decimal::ZERO {
        return Err(ServiceError::InvalidInput(
            "unit price must not be negative".to_string(),
        ));
    }
    if line.name.trim().is_empty() {
        return Err(ServiceError::InvalidInput(
            "item name must not be blank".to_string(),
        ));
    }
    Ok(())
}

/// Adds `line` to the in-memory cart, binding the restaurant on first use.
pub fn apply_add(
    cart: &mut CartModel,
    lines: &mut Vec<cart_item::Model>,
    line: NewCartLine,
    now: DateTime<Utc>,
) -> Result<LineChange, ServiceError> {
    validate_new_line(&line)?;

    match cart.restaurant_id {
        Some(bound) if bound != line.restaurant_id => {
            return Err(ServiceError::RestaurantMismatch {
                cart_restaurant: bound,
                item_restaurant: line.restaurant_id,
            });
        }
        Some(_) => {}
        None => cart.restaurant_id = Some(line.restaurant_id),
    }

    if let Some(existing) = lines
        .iter_mut()
        .find(|l| l.same_configuration(line.menu_item_id, &line.options))
    {
        let quantity = existing
            .quantity
            .checked_add(line.quantity)
            .ok_or(ServiceError::InvalidQuantity(line.quantity))?;
        existing.quantity = quantity;
        existing.line_total = line_total(existing.unit_price, quantity);
        existing.updated_at = now;
        return Ok(LineChange::Update(existing.clone()));
    }

    let item = cart_item::Model {
        id: Uuid::new_v4(),
        cart_id: cart.id,
        menu_item_id: line.menu_item_id,
        restaurant_id: line.restaurant_id,
        name: line.name.trim().to_string(),
        unit_price: line.unit_price,
        quantity: line.quantity,
        line_total: line_total(line.unit_price, line.quantity),
        options: line.options,
        created_at: now,
        updated_at: now,
    };
    lines.push(item.clone());
    Ok(LineChange::Insert(item))
}

/// Sets the quantity of `item_id`; zero removes the line.
pub fn apply_update(
    lines: &mut Vec<cart_item::Model>,
    item_id: Uuid,
    quantity: i32,
    now: DateTime<Utc>,
) -> Result<LineChange, ServiceError> {
    if quantity < 0 {
        return Err(ServiceError::InvalidQuantity(quantity));
    }
    let index = lines
        .iter()
        .position(|l| l.id == item_id)
        .ok_or(ServiceError::ItemNotFound(item_id))?;

    if quantity == 0 {
        lines.remove(index);
        return Ok(LineChange::Delete(item_id));
    }

    let line = &mut lines[index];
    line.quantity = quantity;
    line.line_total = line_total(line.unit_price, quantity);
    line.updated_at = now;
    Ok(LineChange::Update(line.clone()))
}

/// Removes `item_id` if present.
pub fn apply_remove(lines: &mut Vec<cart_item::Model>, item_id: Uuid) -> Option<LineChange> {
    let index = lines.iter().position(|l| l.id == item_id)?;
    lines.remove(index);
    Some(LineChange::Delete(item_id))
}

/// Unions guest lines into the target cart's lines.
///
/// Identical configurations have their quantities summed; everything else is
/// copied in as a new line owned by the target cart.
pub fn merge_lines(
    target_cart_id: Uuid,
    target: &mut Vec<cart_item::Model>,
    guest: &[cart_item::Model],
    now: DateTime<Utc>,
) -> Result<Vec<LineChange>, ServiceError> {
    let mut changes: Vec<LineChange> = Vec::new();

    for incoming in guest {
        if let Some(existing) = target
            .iter_mut()
            .find(|l| l.same_configuration(incoming.menu_item_id, &incoming.options))
        {
            existing.quantity = existing
                .quantity
                .checked_add(incoming.quantity)
                .ok_or(ServiceError::InvalidQuantity(incoming.quantity))?;
            existing.line_total = line_total(existing.unit_price, existing.quantity);
            existing.updated_at = now;

            let updated = existing.clone();
            match changes.iter_mut().find(|c| match c {
                LineChange::Insert(l) | LineChange::Update(l) => l.id == updated.id,
                LineChange::Delete(_) => false,
            }) {
                Some(LineChange::Insert(l)) | Some(LineChange::Update(l)) => *l = updated,
                _ => changes.push(LineChange::Update(updated)),
            }
            continue;
        }

        let copy = cart_item::Model {
            id: Uuid::new_v4(),
            cart_id: target_cart_id,
            created_at: now,
            updated_at: now,
            ..incoming.clone()
        };
        target.push(copy.clone());
        changes.push(LineChange::Insert(copy));
    }

    Ok(changes)
}
