use braid_core::error::BraidError;
use braid_core::types::{Address, BallId, Mci, UnitId};
use braid_dag::{Asset, Ball, Output, Unit, UnitDerived};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use std::path::Path;

/// Maps a committed transaction's outcome back to `BraidError`: an `Abort`
/// carries whatever error the closure raised, a `Storage` failure (conflict
/// retries exhausted, I/O error) goes through `storage_err` like every other
/// sled call in this file.
fn tx_err(e: TransactionError<BraidError>) -> BraidError {
    match e {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => storage_err(err),
    }
}

fn storage_err(e: impl std::fmt::Display) -> BraidError {
    BraidError::Storage(e.to_string())
}

fn ser_err(e: impl std::fmt::Display) -> BraidError {
    BraidError::Serialization(e.to_string())
}

fn output_key(unit: &UnitId, message_index: u32, output_index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(32 + 8);
    key.extend_from_slice(unit.as_bytes());
    key.extend_from_slice(&message_index.to_be_bytes());
    key.extend_from_slice(&output_index.to_be_bytes());
    key
}

fn author_index_key(address: &Address, unit: &UnitId) -> Vec<u8> {
    let mut key = Vec::with_capacity(24 + 32);
    key.extend_from_slice(address.as_bytes());
    key.extend_from_slice(unit.as_bytes());
    key
}

fn address_output_key(address: &Address, unit: &UnitId, message_index: u32, output_index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(24 + 32 + 8);
    key.extend_from_slice(address.as_bytes());
    key.extend(output_key(unit, message_index, output_index));
    key
}

fn best_child_key(best_parent: &UnitId, child: &UnitId) -> Vec<u8> {
    let mut key = Vec::with_capacity(64);
    key.extend_from_slice(best_parent.as_bytes());
    key.extend_from_slice(child.as_bytes());
    key
}

/// The persistent state database (§6.3), backed by sled.
///
/// Named trees:
///   units            — UnitId bytes            → bincode(Unit)
///   unit_derived      — UnitId bytes            → bincode(UnitDerived)
///   balls            — UnitId bytes            → bincode(Ball)            (one row per stable unit)
///   outputs          — UnitId||msg_idx||out_idx → bincode(Output)
///   definitions      — Address bytes           → bincode(serde_json::Value) (bound at stabilization)
///   aa_definitions   — Address bytes           → bincode(serde_json::Value)
///   mc_index         — mci BE bytes            → UnitId bytes (on-MC unit at that index)
///   hash_tree_balls  — UnitId bytes            → bincode(Ball)            (transient, catchup pending set)
///   address_outputs  — Address||output_key     → output_key bytes (pointer into `outputs`)
///   tips             — UnitId bytes            → () (units with no known child, §4.6.1)
///   meta             — utf8 key bytes          → raw bytes
pub struct StateDb {
    _db: sled::Db,
    units: sled::Tree,
    unit_derived: sled::Tree,
    balls: sled::Tree,
    outputs: sled::Tree,
    definitions: sled::Tree,
    aa_definitions: sled::Tree,
    mc_index: sled::Tree,
    hash_tree_balls: sled::Tree,
    author_index: sled::Tree,
    address_outputs: sled::Tree,
    assets: sled::Tree,
    best_children: sled::Tree,
    tips: sled::Tree,
    meta: sled::Tree,
}

impl StateDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BraidError> {
        let db = sled::open(path).map_err(storage_err)?;
        Ok(Self {
            units: db.open_tree("units").map_err(storage_err)?,
            unit_derived: db.open_tree("unit_derived").map_err(storage_err)?,
            balls: db.open_tree("balls").map_err(storage_err)?,
            outputs: db.open_tree("outputs").map_err(storage_err)?,
            definitions: db.open_tree("definitions").map_err(storage_err)?,
            aa_definitions: db.open_tree("aa_definitions").map_err(storage_err)?,
            mc_index: db.open_tree("mc_index").map_err(storage_err)?,
            hash_tree_balls: db.open_tree("hash_tree_balls").map_err(storage_err)?,
            author_index: db.open_tree("author_index").map_err(storage_err)?,
            address_outputs: db.open_tree("address_outputs").map_err(storage_err)?,
            assets: db.open_tree("assets").map_err(storage_err)?,
            best_children: db.open_tree("best_children").map_err(storage_err)?,
            tips: db.open_tree("tips").map_err(storage_err)?,
            meta: db.open_tree("meta").map_err(storage_err)?,
            _db: db,
        })
    }

    // ── Units ────────────────────────────────────────────────────────────────

    pub fn get_unit(&self, id: &UnitId) -> Result<Option<Unit>, BraidError> {
        match self.units.get(id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(bincode::deserialize(&b).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn put_unit(&self, id: &UnitId, unit: &Unit) -> Result<(), BraidError> {
        let bytes = bincode::serialize(unit).map_err(ser_err)?;
        self.units.insert(id.as_bytes(), bytes).map_err(storage_err)?;
        Ok(())
    }

    pub fn unit_exists(&self, id: &UnitId) -> bool {
        self.units.contains_key(id.as_bytes()).unwrap_or(false)
    }

    // ── Derived static props ─────────────────────────────────────────────────

    pub fn get_derived(&self, id: &UnitId) -> Result<Option<UnitDerived>, BraidError> {
        match self.unit_derived.get(id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(bincode::deserialize(&b).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn put_derived(&self, id: &UnitId, derived: &UnitDerived) -> Result<(), BraidError> {
        let bytes = bincode::serialize(derived).map_err(ser_err)?;
        self.unit_derived.insert(id.as_bytes(), bytes).map_err(storage_err)?;
        Ok(())
    }

    // ── Balls (one row per stable unit) ──────────────────────────────────────

    pub fn get_ball(&self, id: &UnitId) -> Result<Option<Ball>, BraidError> {
        match self.balls.get(id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(bincode::deserialize(&b).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    /// Commits `ball` and retires its hash-tree pending entry (if any) in one
    /// transaction, so a reader never observes the ball recorded as final in
    /// `balls` while it is still sitting in `hash_tree_balls` as pending, or
    /// vice versa.
    pub fn commit_ball(&self, id: &UnitId, ball: &Ball) -> Result<(), BraidError> {
        let bytes = bincode::serialize(ball).map_err(ser_err)?;
        (&self.balls, &self.hash_tree_balls)
            .transaction(|(balls, hash_tree_balls)| {
                balls.insert(id.as_bytes(), bytes.clone())?;
                hash_tree_balls.remove(id.as_bytes())?;
                Ok(())
            })
            .map_err(tx_err)
    }

    /// Resolve a committed `BallId` back to the unit it belongs to by scanning
    /// committed balls. Used sparingly (catchup proof verification), not on
    /// any validator hot path.
    pub fn find_unit_by_ball_id(&self, ball_id: &BallId) -> Result<Option<UnitId>, BraidError> {
        for item in self.balls.iter() {
            let (key, bytes) = item.map_err(storage_err)?;
            let ball: Ball = bincode::deserialize(&bytes).map_err(ser_err)?;
            if ball.compute_ball_id()? == *ball_id {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&key);
                return Ok(Some(UnitId::from_bytes(arr)));
            }
        }
        Ok(None)
    }

    // ── Hash-tree pending balls (transient, §4.7.3) ─────────────────────────

    pub fn pending_hash_tree_count(&self) -> usize {
        self.hash_tree_balls.len()
    }

    pub fn put_pending_ball(&self, id: &UnitId, ball: &Ball) -> Result<(), BraidError> {
        let bytes = bincode::serialize(ball).map_err(ser_err)?;
        self.hash_tree_balls.insert(id.as_bytes(), bytes).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_pending_ball(&self, id: &UnitId) -> Result<Option<Ball>, BraidError> {
        match self.hash_tree_balls.get(id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(bincode::deserialize(&b).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn evict_pending_ball(&self, id: &UnitId) -> Result<(), BraidError> {
        self.hash_tree_balls.remove(id.as_bytes()).map_err(storage_err)?;
        Ok(())
    }

    pub fn clear_pending_balls(&self) -> Result<(), BraidError> {
        self.hash_tree_balls.clear().map_err(storage_err)?;
        Ok(())
    }

    /// Scans the pending set for a ball with the given id. Bounded by
    /// `B_MAX`, so this is a short scan even in the worst case.
    pub fn find_pending_by_ball_id(&self, ball_id: &BallId) -> Result<bool, BraidError> {
        for item in self.hash_tree_balls.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let ball: Ball = bincode::deserialize(&bytes).map_err(ser_err)?;
            if ball.compute_ball_id()? == *ball_id {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ── Outputs ──────────────────────────────────────────────────────────────

    pub fn insert_output(
        &self,
        unit: &UnitId,
        message_index: u32,
        output_index: u32,
        output: &Output,
    ) -> Result<(), BraidError> {
        let key = output_key(unit, message_index, output_index);
        let bytes = bincode::serialize(output).map_err(ser_err)?;
        self.outputs.insert(&key, bytes).map_err(storage_err)?;
        self.address_outputs
            .insert(address_output_key(&output.address, unit, message_index, output_index), key)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_output(
        &self,
        unit: &UnitId,
        message_index: u32,
        output_index: u32,
    ) -> Result<Option<Output>, BraidError> {
        match self
            .outputs
            .get(output_key(unit, message_index, output_index))
            .map_err(storage_err)?
        {
            Some(b) => Ok(Some(bincode::deserialize(&b).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn read_outputs(&self, unit: &UnitId, message_index: u32) -> Result<Vec<Output>, BraidError> {
        let mut prefix = Vec::with_capacity(36);
        prefix.extend_from_slice(unit.as_bytes());
        prefix.extend_from_slice(&message_index.to_be_bytes());
        let mut out = Vec::new();
        for item in self.outputs.scan_prefix(prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    /// Outputs paid to `address`, capped at `limit`, for the `has`/`sum`/`seen`
    /// script operators. Bounded the same way conflict detection is bounded:
    /// never scanned in unbounded form.
    pub fn outputs_by_address(&self, address: &Address, limit: usize) -> Result<Vec<Output>, BraidError> {
        let mut out = Vec::new();
        for item in self.address_outputs.scan_prefix(address.as_bytes()).take(limit) {
            let (_, output_key_bytes) = item.map_err(storage_err)?;
            if let Some(bytes) = self.outputs.get(&output_key_bytes).map_err(storage_err)? {
                out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
            }
        }
        Ok(out)
    }

    /// Like `outputs_by_address`, but keeps each output's `(unit,
    /// message_index, output_index)` coordinates — the `address_outputs`
    /// value is already that triple's encoded `output_key`, so this just
    /// decodes it instead of discarding it. Skips already-spent outputs,
    /// since the only consumer is coin selection for a new spend.
    pub fn spendable_outputs_by_address(&self, address: &Address, limit: usize) -> Result<Vec<(UnitId, u32, u32, Output)>, BraidError> {
        let mut out = Vec::new();
        for item in self.address_outputs.scan_prefix(address.as_bytes()).take(limit) {
            let (_, output_key_bytes) = item.map_err(storage_err)?;
            let Some(bytes) = self.outputs.get(&output_key_bytes).map_err(storage_err)? else { continue };
            let output: Output = bincode::deserialize(&bytes).map_err(ser_err)?;
            if output.is_spent {
                continue;
            }
            let mut unit_bytes = [0u8; 32];
            unit_bytes.copy_from_slice(&output_key_bytes[0..32]);
            let message_index = u32::from_be_bytes(output_key_bytes[32..36].try_into().unwrap());
            let output_index = u32::from_be_bytes(output_key_bytes[36..40].try_into().unwrap());
            out.push((UnitId::from_bytes(unit_bytes), message_index, output_index, output));
        }
        Ok(out)
    }

    // ── Assets (issuance policy, §3.1/§4.5.1 phase 9) ───────────────────

    pub fn bind_asset(&self, asset_id: &str, asset: &Asset) -> Result<(), BraidError> {
        let bytes = bincode::serialize(asset).map_err(ser_err)?;
        self.assets.insert(asset_id.as_bytes(), bytes).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_asset(&self, asset_id: &str) -> Result<Option<Asset>, BraidError> {
        match self.assets.get(asset_id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(bincode::deserialize(&b).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    // ── Definitions (bound at stabilization, §3.3) ───────────────────────────

    pub fn get_definition(&self, address: &Address) -> Result<Option<serde_json::Value>, BraidError> {
        match self.definitions.get(address.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(bincode::deserialize(&b).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn bind_definition(&self, address: &Address, definition: &serde_json::Value) -> Result<(), BraidError> {
        let bytes = bincode::serialize(definition).map_err(ser_err)?;
        self.definitions.insert(address.as_bytes(), bytes).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_aa_definition(&self, address: &Address) -> Result<Option<serde_json::Value>, BraidError> {
        match self.aa_definitions.get(address.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(bincode::deserialize(&b).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    // ── Author index (conflict detection, §4.5.1 phase 8) ──────────────

    pub fn index_author(&self, address: &Address, unit: &UnitId) -> Result<(), BraidError> {
        self.author_index
            .insert(author_index_key(address, unit), unit.as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    /// Units authored by `address`, capped at `N_CONF` — the conflict-
    /// detection bound, never scanned in unbounded form.
    pub fn units_by_author(&self, address: &Address, limit: usize) -> Result<Vec<UnitId>, BraidError> {
        let mut out = Vec::new();
        for item in self.author_index.scan_prefix(address.as_bytes()).take(limit) {
            let (_, bytes) = item.map_err(storage_err)?;
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&bytes);
            out.push(UnitId::from_bytes(arr));
        }
        Ok(out)
    }

    // ── Best-child index (alternative-branch search, §4.6.2) ────────────

    /// Record that `child`'s `best_parent_unit` is `best_parent`. The
    /// stability test needs the reverse (parent → best-children) direction
    /// that `GraphView` does not expose, to enumerate alternative branches
    /// without a full table scan.
    pub fn index_best_child(&self, best_parent: &UnitId, child: &UnitId) -> Result<(), BraidError> {
        self.best_children
            .insert(best_child_key(best_parent, child), child.as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn best_children_of(&self, parent: &UnitId) -> Result<Vec<UnitId>, BraidError> {
        let mut out = Vec::new();
        for item in self.best_children.scan_prefix(parent.as_bytes()) {
            let (_, bytes) = item.map_err(storage_err)?;
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&bytes);
            out.push(UnitId::from_bytes(arr));
        }
        Ok(out)
    }

    // ── Free tips (§4.6.1 MC selection starts from each free tip) ───────

    /// A newly admitted unit starts as a tip; each of its parents stops
    /// being one, since they now have a known child.
    pub fn record_tip_transition(&self, new_unit: &UnitId, parents: &[UnitId]) -> Result<(), BraidError> {
        self.tips.insert(new_unit.as_bytes(), &[]).map_err(storage_err)?;
        for parent in parents {
            self.tips.remove(parent.as_bytes()).map_err(storage_err)?;
        }
        Ok(())
    }

    pub fn list_tips(&self) -> Result<Vec<UnitId>, BraidError> {
        let mut out = Vec::new();
        for item in self.tips.iter() {
            let (key, _) = item.map_err(storage_err)?;
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&key);
            out.push(UnitId::from_bytes(arr));
        }
        Ok(out)
    }

    // ── Atomic unit admission (one `StagedUnitWrite`, §4.2/§5) ──────────────

    /// Commits every row a single unit's admission may produce across the
    /// nine trees it can touch, in one sled transaction: either all of them
    /// land, or (on error, or on an sled-detected write conflict exhausting
    /// its retries) none do. Values are serialized before the closure runs,
    /// since the closure itself must stay pure — sled re-runs it on conflict.
    #[allow(clippy::too_many_arguments)]
    pub fn commit_unit_admission(
        &self,
        unit: Option<(&UnitId, &Unit, &UnitDerived)>,
        outputs: &[(UnitId, u32, u32, Output)],
        spent_outputs: &[(UnitId, u32, u32)],
        bound_definitions: &[(Address, serde_json::Value)],
        sibling_derived_updates: &[(UnitId, UnitDerived)],
        author_index_entries: &[(Address, UnitId)],
        asset_definitions: &[(String, Asset)],
        best_child_entries: &[(UnitId, UnitId)],
    ) -> Result<(), BraidError> {
        let unit_row = unit
            .map(|(id, u, d)| -> Result<_, BraidError> {
                Ok((id.clone(), bincode::serialize(u).map_err(ser_err)?, bincode::serialize(d).map_err(ser_err)?))
            })
            .transpose()?;

        let output_rows: Vec<_> = outputs
            .iter()
            .map(|(unit, msg_idx, out_idx, output)| -> Result<_, BraidError> {
                let key = output_key(unit, *msg_idx, *out_idx);
                let addr_key = address_output_key(&output.address, unit, *msg_idx, *out_idx);
                let bytes = bincode::serialize(output).map_err(ser_err)?;
                Ok((key, addr_key, bytes))
            })
            .collect::<Result<_, _>>()?;

        let spend_keys: Vec<_> = spent_outputs.iter().map(|(u, m, o)| output_key(u, *m, *o)).collect();

        let bound_definition_rows: Vec<_> = bound_definitions
            .iter()
            .map(|(addr, def)| -> Result<_, BraidError> { Ok((addr.as_bytes().to_vec(), bincode::serialize(def).map_err(ser_err)?)) })
            .collect::<Result<_, _>>()?;

        let sibling_rows: Vec<_> = sibling_derived_updates
            .iter()
            .map(|(id, d)| -> Result<_, BraidError> { Ok((id.as_bytes().to_vec(), bincode::serialize(d).map_err(ser_err)?)) })
            .collect::<Result<_, _>>()?;

        let author_rows: Vec<_> = author_index_entries
            .iter()
            .map(|(addr, unit)| (author_index_key(addr, unit), unit.as_bytes().to_vec()))
            .collect();

        let asset_rows: Vec<_> = asset_definitions
            .iter()
            .map(|(id, asset)| -> Result<_, BraidError> { Ok((id.as_bytes().to_vec(), bincode::serialize(asset).map_err(ser_err)?)) })
            .collect::<Result<_, _>>()?;

        let best_child_rows: Vec<_> = best_child_entries
            .iter()
            .map(|(parent, child)| (best_child_key(parent, child), child.as_bytes().to_vec()))
            .collect();

        (
            &self.units,
            &self.unit_derived,
            &self.outputs,
            &self.address_outputs,
            &self.definitions,
            &self.author_index,
            &self.assets,
            &self.best_children,
            &self.tips,
        )
            .transaction(
                |(units, unit_derived, outputs, address_outputs, definitions, author_index, assets, best_children, tips)| {
                    if let Some((id, unit_bytes, derived_bytes)) = &unit_row {
                        units.insert(id.as_bytes(), unit_bytes.clone())?;
                        unit_derived.insert(id.as_bytes(), derived_bytes.clone())?;
                    }
                    for (key, addr_key, bytes) in &output_rows {
                        outputs.insert(key.as_slice(), bytes.clone())?;
                        address_outputs.insert(addr_key.as_slice(), key.clone())?;
                    }
                    for key in &spend_keys {
                        let Some(existing) = outputs.get(key.as_slice())? else {
                            return Err(ConflictableTransactionError::Abort(BraidError::Other(
                                "unknown output for spend".to_string(),
                            )));
                        };
                        let mut spent: Output = bincode::deserialize(&existing)
                            .map_err(|e| ConflictableTransactionError::Abort(ser_err(e)))?;
                        spent.is_spent = true;
                        let bytes = bincode::serialize(&spent).map_err(|e| ConflictableTransactionError::Abort(ser_err(e)))?;
                        outputs.insert(key.as_slice(), bytes)?;
                    }
                    for (addr_key, bytes) in &bound_definition_rows {
                        definitions.insert(addr_key.as_slice(), bytes.clone())?;
                    }
                    for (id, bytes) in &sibling_rows {
                        unit_derived.insert(id.as_slice(), bytes.clone())?;
                    }
                    for (key, val) in &author_rows {
                        author_index.insert(key.as_slice(), val.clone())?;
                    }
                    for (key, bytes) in &asset_rows {
                        assets.insert(key.as_slice(), bytes.clone())?;
                    }
                    for (key, val) in &best_child_rows {
                        best_children.insert(key.as_slice(), val.clone())?;
                    }
                    if let Some((id, u, _)) = unit {
                        tips.insert(id.as_bytes(), &[] as &[u8])?;
                        for parent in &u.parent_units {
                            tips.remove(parent.as_bytes())?;
                        }
                    }
                    Ok(())
                },
            )
            .map_err(tx_err)
    }

    // ── Main-chain index ──────────────────────────────────────────────────────

    pub fn set_mc_position(&self, unit: &UnitId, mci: Mci, is_on_mc: bool) -> Result<(), BraidError> {
        if is_on_mc {
            self.mc_index.insert(mci.to_be_bytes(), unit.as_bytes()).map_err(storage_err)?;
        } else if let Some(existing) = self.mc_index.get(mci.to_be_bytes()).map_err(storage_err)? {
            if existing.as_ref() == unit.as_bytes() {
                self.mc_index.remove(mci.to_be_bytes()).map_err(storage_err)?;
            }
        }
        Ok(())
    }

    pub fn unit_at_mci(&self, mci: Mci) -> Result<Option<UnitId>, BraidError> {
        match self.mc_index.get(mci.to_be_bytes()).map_err(storage_err)? {
            Some(b) => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&b);
                Ok(Some(UnitId::from_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    // ── Meta (last_stable_mci and friends) ───────────────────────────────────

    pub fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), BraidError> {
        self.meta.insert(key.as_bytes(), value).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, BraidError> {
        self.meta
            .get(key.as_bytes())
            .map(|v| v.map(|iv| iv.to_vec()))
            .map_err(storage_err)
    }

    pub fn last_stable_mci(&self) -> Result<Mci, BraidError> {
        Ok(self
            .get_meta("last_stable_mci")?
            .map(|b| {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&b);
                Mci::from_be_bytes(arr)
            })
            .unwrap_or(0))
    }

    pub fn set_last_stable_mci(&self, mci: Mci) -> Result<(), BraidError> {
        self.put_meta("last_stable_mci", &mci.to_be_bytes())
    }

    /// Commits every ball in `batch_of_balls`, marks each unit stable, and
    /// advances `last_stable_mci` in one transaction across `balls`,
    /// `hash_tree_balls`, `unit_derived` and `meta` — a reader must never see
    /// `last_stable_mci` move past a unit whose ball isn't committed yet, or
    /// a unit marked stable whose ball isn't. The per-unit `UnitDerived` read
    /// happens before the transaction, consistent with every other write
    /// path in this engine relying on the caller's write lock rather than
    /// sled's own conflict detection for read-modify-write correctness.
    pub fn advance_last_stable_mci(&self, new_mci: Mci, batch_of_balls: &[(UnitId, Ball)]) -> Result<(), BraidError> {
        let mut rows = Vec::with_capacity(batch_of_balls.len());
        for (id, ball) in batch_of_balls {
            let ball_bytes = bincode::serialize(ball).map_err(ser_err)?;
            let mut derived = self.get_derived(id)?.unwrap_or_default();
            derived.is_stable = true;
            let derived_bytes = bincode::serialize(&derived).map_err(ser_err)?;
            rows.push((id.clone(), ball_bytes, derived_bytes));
        }
        let mci_bytes = new_mci.to_be_bytes().to_vec();

        (&self.balls, &self.hash_tree_balls, &self.unit_derived, &self.meta)
            .transaction(|(balls, hash_tree_balls, unit_derived, meta)| {
                for (id, ball_bytes, derived_bytes) in &rows {
                    balls.insert(id.as_bytes(), ball_bytes.clone())?;
                    hash_tree_balls.remove(id.as_bytes())?;
                    unit_derived.insert(id.as_bytes(), derived_bytes.clone())?;
                }
                meta.insert(b"last_stable_mci".as_ref(), mci_bytes.clone())?;
                Ok(())
            })
            .map_err(tx_err)
    }

    pub fn flush(&self) -> Result<(), BraidError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }
}
