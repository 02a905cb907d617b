//! Orders and order lists, persisted in the `ORDR` and `ORDL` chunks.
//!
//! Orders form singly linked chains through the order pool. A vehicle's
//! current order is an [`OrderBody`] embedded in the vehicle itself and
//! persisted through an include of [`ORDER_BODY_DESC`].

use std::sync::LazyLock;

use railsave_core::chunk::{fixup_pool, load_pool, save_pool};
use railsave_core::conv::FileType;
use railsave_core::descriptor::{include, reference_field, scalar_field};
use railsave_core::pool::Handle;
use railsave_core::{
    Availability, ChunkReader, ChunkTag, ChunkWriter, FixupContext, FormatVersion, Link, Pool, Pooled, RefKind,
    Result, Schema, accessor, field,
};

use crate::ids::StationId;
use crate::vehicle::Vehicle;
use crate::world::World;

pub const ORDR: ChunkTag = ChunkTag::new(b"ORDR");
pub const ORDL: ChunkTag = ChunkTag::new(b"ORDL");

/// What an order tells a vehicle to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OrderType {
    Nothing = 0,
    GotoStation = 1,
    GotoDepot = 2,
    Loading = 3,
    LeaveStation = 4,
    Dummy = 5,
    GotoWaypoint = 6,
    Conditional = 7,
    Implicit = 8,
}

impl OrderType {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => OrderType::GotoStation,
            2 => OrderType::GotoDepot,
            3 => OrderType::Loading,
            4 => OrderType::LeaveStation,
            5 => OrderType::Dummy,
            6 => OrderType::GotoWaypoint,
            7 => OrderType::Conditional,
            8 => OrderType::Implicit,
            _ => OrderType::Nothing,
        }
    }
}

/// The persisted payload of an order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderBody {
    pub kind: u8,
    pub flags: u8,
    pub dest: u16,
}

impl OrderBody {
    pub fn goto_station(dest: StationId) -> Self {
        Self {
            kind: OrderType::GotoStation as u8,
            flags: 0,
            dest,
        }
    }

    pub fn order_type(&self) -> OrderType {
        OrderType::from_u8(self.kind)
    }

    pub fn is_type(&self, kind: OrderType) -> bool {
        self.order_type() == kind
    }

    pub fn make_goto_waypoint(&mut self, dest: StationId) {
        self.kind = OrderType::GotoWaypoint as u8;
        self.flags = 0;
        self.dest = dest;
    }
}

pub static ORDER_BODY_DESC: LazyLock<Schema<OrderBody>> = LazyLock::new(|| {
    Schema::new(vec![
        scalar_field(FileType::U8, field!(OrderBody, kind)),
        scalar_field(FileType::U8, field!(OrderBody, flags)),
        scalar_field(FileType::U8, field!(OrderBody, dest)).available(Availability::legacy_only(0, 4)),
        scalar_field(FileType::U16, field!(OrderBody, dest)).available(Availability::always().legacy(5, 0)),
    ])
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Order {
    pub body: OrderBody,
    pub next: Link<Order>,
}

impl Pooled for Order {
    const KIND: RefKind = RefKind::Order;
}

static ORDER_DESC: LazyLock<Schema<Order>> = LazyLock::new(|| {
    Schema::new(vec![
        include(&ORDER_BODY_DESC, accessor!(Order, body)),
        reference_field(field!(Order, next)),
    ])
});

/// Orders shared by one or more vehicles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderList {
    pub first: Link<Order>,
    /// Lowest-indexed vehicle using the list. Rebuilt after load.
    pub first_shared: Option<Handle<Vehicle>>,
}

impl Pooled for OrderList {
    const KIND: RefKind = RefKind::OrderList;
}

static ORDER_LIST_DESC: LazyLock<Schema<OrderList>> =
    LazyLock::new(|| Schema::new(vec![reference_field(field!(OrderList, first))]));

/// Iterate the order chain starting at `first`.
pub fn chain(orders: &Pool<Order>, first: Link<Order>) -> impl Iterator<Item = Handle<Order>> + '_ {
    let mut next = first.handle();
    let mut steps = orders.len();
    std::iter::from_fn(move || {
        let here = next?;
        if steps == 0 {
            return None;
        }
        steps -= 1;
        next = orders.get(here).and_then(|o| o.next.handle());
        Some(here)
    })
}

pub(crate) fn save_ordr(world: &World, w: &mut ChunkWriter<'_>) {
    save_pool(w, &world.orders, &ORDER_DESC, &());
}

pub(crate) fn load_ordr(world: &mut World, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    load_pool(r, &mut world.orders, &ORDER_DESC, &mut ())
}

pub(crate) fn fixup_ordr(world: &mut World, ctx: &FixupContext<'_>) -> Result<()> {
    fixup_pool(ORDR, &mut world.orders, &ORDER_DESC, &mut (), ctx)
}

pub(crate) fn save_ordl(world: &World, w: &mut ChunkWriter<'_>) {
    save_pool(w, &world.order_lists, &ORDER_LIST_DESC, &());
}

pub(crate) fn load_ordl(world: &mut World, r: &mut ChunkReader<'_, '_>) -> Result<()> {
    load_pool(r, &mut world.order_lists, &ORDER_LIST_DESC, &mut ())
}

pub(crate) fn fixup_ordl(world: &mut World, ctx: &FixupContext<'_>) -> Result<()> {
    fixup_pool(ORDL, &mut world.order_lists, &ORDER_LIST_DESC, &mut (), ctx)
}

/// Point every order list at the first vehicle that uses it.
pub(crate) fn after_load_order_lists(world: &mut World, _: &FormatVersion) -> Result<()> {
    for (_, list) in world.order_lists.iter_mut() {
        list.first_shared = None;
    }
    for (handle, vehicle) in world.vehicles.iter() {
        if let Some(list) = vehicle.orders.handle().and_then(|h| world.order_lists.get_mut(h)) {
            list.first_shared.get_or_insert(handle);
        }
    }
    Ok(())
}
