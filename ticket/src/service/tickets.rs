//! Ticket search, purchases, orders and the waiting queue.
//!
//! Orders are append-only records. `OrderIndex.dat` maps a user's record
//! position to their order positions, which ascend in purchase order.
//! `QueueIndex.dat` maps `(train position, run)` to the pending orders for
//! that run, again oldest first, which is the order refunds serve them in.

// Stop numbers are below MAX_STATIONS.
#![allow(clippy::cast_possible_truncation)]

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::path::Path;

use crate::service::trains::{Train, TrainService};
use crate::service::users::UserService;
use crate::service::{Rejection, ServiceResult, open_tree};
use crate::storage::btree::BPlusTree;
use crate::storage::codec::{CodecError, FixedCodec, read_i32, read_u32, write_i32, write_u32};
use crate::storage::RecordFile;
use crate::types::{Date, DateTime, Pair, StationName, TrainId, UserName};

/// State of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Success = 0,
    /// Waiting in the queue for seats.
    Pending = 1,
    Refunded = 2,
}

impl FixedCodec for OrderStatus {
    const WIDTH: usize = 1;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self as u8;
    }

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        match buf[0] {
            0 => Ok(Self::Success),
            1 => Ok(Self::Pending),
            2 => Ok(Self::Refunded),
            other => Err(CodecError::InvalidFlag(i32::from(other))),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "[success]",
            Self::Pending => "[pending]",
            Self::Refunded => "[refunded]",
        })
    }
}

mod offsets {
    // The status comes first so it can be rewritten in place.
    pub const STATUS: usize = 0;
    pub const TRAIN_POS: usize = 1;
    pub const RUN: usize = 5;
    pub const FROM: usize = 9;
    pub const TO: usize = 13;
    pub const USER: usize = 17;
    pub const TRAIN_ID: usize = 41;
    pub const FROM_STATION: usize = 65;
    pub const TO_STATION: usize = 113;
    pub const DEPARTURE: usize = 161;
    pub const ARRIVAL: usize = 165;
    pub const PRICE: usize = 169;
    pub const AMOUNT: usize = 173;
    pub const END: usize = 177;
}

/// A stored order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub status: OrderStatus,
    pub train_pos: u32,
    /// Run offset within the train's sale range.
    pub run: u32,
    pub from: u32,
    pub to: u32,
    pub user: UserName,
    pub train_id: TrainId,
    pub from_station: StationName,
    pub to_station: StationName,
    pub departure: DateTime,
    pub arrival: DateTime,
    /// Price of one ticket.
    pub price: i32,
    pub amount: i32,
}

impl FixedCodec for Order {
    const WIDTH: usize = offsets::END;

    fn encode(&self, buf: &mut [u8]) {
        self.status.encode(&mut buf[offsets::STATUS..]);
        write_u32(buf, offsets::TRAIN_POS, self.train_pos);
        write_u32(buf, offsets::RUN, self.run);
        write_u32(buf, offsets::FROM, self.from);
        write_u32(buf, offsets::TO, self.to);
        self.user.encode(&mut buf[offsets::USER..]);
        self.train_id.encode(&mut buf[offsets::TRAIN_ID..]);
        self.from_station.encode(&mut buf[offsets::FROM_STATION..]);
        self.to_station.encode(&mut buf[offsets::TO_STATION..]);
        self.departure.encode(&mut buf[offsets::DEPARTURE..]);
        self.arrival.encode(&mut buf[offsets::ARRIVAL..]);
        write_i32(buf, offsets::PRICE, self.price);
        write_i32(buf, offsets::AMOUNT, self.amount);
    }

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            status: OrderStatus::decode(&buf[offsets::STATUS..])?,
            train_pos: read_u32(buf, offsets::TRAIN_POS),
            run: read_u32(buf, offsets::RUN),
            from: read_u32(buf, offsets::FROM),
            to: read_u32(buf, offsets::TO),
            user: UserName::decode(&buf[offsets::USER..])?,
            train_id: TrainId::decode(&buf[offsets::TRAIN_ID..])?,
            from_station: StationName::decode(&buf[offsets::FROM_STATION..])?,
            to_station: StationName::decode(&buf[offsets::TO_STATION..])?,
            departure: DateTime::decode(&buf[offsets::DEPARTURE..])?,
            arrival: DateTime::decode(&buf[offsets::ARRIVAL..])?,
            price: read_i32(buf, offsets::PRICE),
            amount: read_i32(buf, offsets::AMOUNT),
        })
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} -> {} {} {} {}",
            self.status,
            self.train_id,
            self.from_station,
            self.departure,
            self.to_station,
            self.arrival,
            self.price,
            self.amount
        )
    }
}

/// Ordering for search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Time,
    Cost,
}

/// A ticket search between two stations, departing on `date`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketQuery {
    pub from: StationName,
    pub to: StationName,
    pub date: Date,
    pub sort: SortKey,
}

/// Request to buy tickets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    pub username: UserName,
    pub train: TrainId,
    /// Departure date from `from`.
    pub date: Date,
    pub from: StationName,
    pub to: StationName,
    pub count: i32,
    /// Queue for seats instead of failing when sold out.
    pub queue: bool,
}

/// One ride on one train run.
#[derive(Debug, Clone, Copy)]
struct Leg {
    train_id: TrainId,
    from_station: StationName,
    to_station: StationName,
    departure: DateTime,
    arrival: DateTime,
    price: i32,
    seats: i32,
}

impl Leg {
    fn new(train: &Train, from: usize, to: usize, start: Date, seats: i32) -> Self {
        Self {
            train_id: train.id,
            from_station: train.stations[from],
            to_station: train.stations[to],
            departure: DateTime::new(start, train.departures[from]),
            arrival: DateTime::new(start, train.arrivals[to]),
            price: train.fare(from, to),
            seats,
        }
    }

    fn measure(&self, sort: SortKey) -> i32 {
        match sort {
            SortKey::Time => self.arrival - self.departure,
            SortKey::Cost => self.price,
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} -> {} {} {} {}",
            self.train_id, self.from_station, self.departure, self.to_station, self.arrival, self.price, self.seats
        )
    }
}

/// A chosen transfer: `(train position, boarding stop, leaving stop, start date)` per leg.
#[derive(Debug, Clone, Copy)]
struct Transfer {
    legs: [(u32, usize, usize, Date); 2],
    rank: (i32, i32, TrainId, TrainId),
}

/// Order storage and the waiting queue.
pub struct TicketService {
    orders: BPlusTree<u32, u32>,
    queue: BPlusTree<Pair<u32, u32>, u32>,
    data: RecordFile<Order>,
}

impl TicketService {
    pub fn open(dir: &Path, order: Option<usize>) -> ServiceResult<Self> {
        Ok(Self {
            orders: open_tree(dir, "OrderIndex.dat", order)?,
            queue: open_tree(dir, "QueueIndex.dat", order)?,
            data: RecordFile::open(&dir.join("OrderData.dat"))?,
        })
    }

    /// Number of orders ever placed.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.data.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Direct trains from `query.from` to `query.to` leaving on `query.date`.
    ///
    /// Prints the number of hits followed by one line per hit, sorted by the
    /// requested key and then by train id.
    pub fn query_ticket(trains: &mut TrainService, query: &TicketQuery) -> ServiceResult<String> {
        let from_stops = trains.station_stops(&query.from)?;
        let to_stops = trains.station_stops(&query.to)?;

        // Both lists are ordered by train position; walk them together.
        let mut legs = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < from_stops.len() && j < to_stops.len() {
            let (a, b) = (from_stops[i], to_stops[j]);
            if a.first < b.first {
                i += 1;
                continue;
            }
            if a.first > b.first {
                j += 1;
                continue;
            }
            i += 1;
            j += 1;

            let (from, to) = (a.second as usize, b.second as usize);
            if from >= to {
                continue;
            }
            let train = trains.read(a.first)?;
            let start = train.start_for(from, query.date);
            let Some(run) = train.run_of(start) else {
                continue;
            };
            let row = trains.seat_row(&train, run)?;
            legs.push(Leg::new(&train, from, to, start, row.available(from, to)));
        }

        if legs.is_empty() {
            return Ok("0".to_string());
        }
        legs.sort_by_key(|leg| (leg.measure(query.sort), leg.train_id));

        let mut out = legs.len().to_string();
        for leg in &legs {
            let _ = write!(out, "\n{leg}");
        }
        Ok(out)
    }

    /// Best itinerary with exactly one change of train.
    ///
    /// The first train leaves `query.from` on `query.date`; the second is the
    /// earliest run that leaves the transfer station no earlier than the first
    /// arrives. Ranked by total time then price (or price then time), then by
    /// both train ids.
    pub fn query_transfer(trains: &mut TrainService, query: &TicketQuery) -> ServiceResult<String> {
        let from_stops = trains.station_stops(&query.from)?;
        let to_stops = trains.station_stops(&query.to)?;

        let mut loaded: HashMap<u32, Train> = HashMap::new();
        for stop in from_stops.iter().chain(&to_stops) {
            if !loaded.contains_key(&stop.first) {
                loaded.insert(stop.first, trains.read(stop.first)?);
            }
        }

        let mut best: Option<Transfer> = None;
        for a in &from_stops {
            let Some(first) = loaded.get(&a.first) else {
                continue;
            };
            let board = a.second as usize;
            let start1 = first.start_for(board, query.date);
            if board + 1 >= first.station_count() || first.run_of(start1).is_none() {
                continue;
            }
            let onward: HashMap<StationName, usize> =
                (board + 1..first.station_count()).map(|x| (first.stations[x], x)).collect();
            let depart = DateTime::new(start1, first.departures[board]);

            for b in &to_stops {
                if b.first == a.first {
                    continue;
                }
                let Some(second) = loaded.get(&b.first) else {
                    continue;
                };
                let leave = b.second as usize;

                for change in 0..leave {
                    let Some(&alight) = onward.get(&second.stations[change]) else {
                        continue;
                    };
                    let arrive = DateTime::new(start1, first.arrivals[alight]);
                    let start2 = arrive
                        .earliest_start(second.departures[change])
                        .max(second.sale_start);
                    if start2 > second.sale_end {
                        continue;
                    }

                    let time = DateTime::new(start2, second.arrivals[leave]) - depart;
                    let price = first.fare(board, alight) + second.fare(change, leave);
                    let rank = match query.sort {
                        SortKey::Time => (time, price, first.id, second.id),
                        SortKey::Cost => (price, time, first.id, second.id),
                    };
                    if best.is_none_or(|current| rank < current.rank) {
                        best = Some(Transfer {
                            legs: [(a.first, board, alight, start1), (b.first, change, leave, start2)],
                            rank,
                        });
                    }
                }
            }
        }

        let Some(best) = best else {
            return Ok("0".to_string());
        };
        let mut lines = Vec::with_capacity(2);
        for (pos, from, to, start) in best.legs {
            let Some(train) = loaded.get(&pos) else {
                continue;
            };
            let run = train.run_of(start).ok_or(Rejection::OutsideSaleRange)?;
            let seats = trains.seat_row(train, run)?.available(from, to);
            lines.push(Leg::new(train, from, to, start, seats).to_string());
        }
        Ok(lines.join("\n"))
    }

    /// Buy tickets, or queue for them.
    ///
    /// Answers the total price, or `queue` when the order was queued.
    pub fn buy_ticket(
        &mut self,
        users: &UserService,
        trains: &mut TrainService,
        purchase: &Purchase,
    ) -> ServiceResult<String> {
        let user_pos = users.session_pos(&purchase.username)?;
        let (train_pos, train) = trains.locate(&purchase.train)?;
        if !train.released {
            return Err(Rejection::NotReleased.into());
        }

        let (Some(from), Some(to)) = (train.stop_of(&purchase.from), train.stop_of(&purchase.to)) else {
            return Err(Rejection::InvalidRoute.into());
        };
        if from >= to {
            return Err(Rejection::InvalidRoute.into());
        }
        let start = train.start_for(from, purchase.date);
        let run = train.run_of(start).ok_or(Rejection::OutsideSaleRange)?;
        if purchase.count <= 0 || purchase.count > train.seat_count {
            return Err(Rejection::InvalidTicketCount.into());
        }

        let mut row = trains.seat_row(&train, run)?;
        let enough = row.available(from, to) >= purchase.count;
        if !enough && !purchase.queue {
            return Err(Rejection::SoldOut.into());
        }

        let mut order = Order {
            status: OrderStatus::Pending,
            train_pos,
            run,
            from: from as u32,
            to: to as u32,
            user: purchase.username,
            train_id: train.id,
            from_station: train.stations[from],
            to_station: train.stations[to],
            departure: DateTime::new(start, train.departures[from]),
            arrival: DateTime::new(start, train.arrivals[to]),
            price: train.fare(from, to),
            amount: purchase.count,
        };

        if enough {
            row.reserve(from, to, purchase.count);
            trains.write_seat_row(&train, run, &row)?;
            order.status = OrderStatus::Success;
            let order_pos = self.data.push(&order)?;
            self.orders.insert(user_pos, order_pos)?;
            let total = i64::from(order.price) * i64::from(order.amount);
            return Ok(total.to_string());
        }

        let order_pos = self.data.push(&order)?;
        self.orders.insert(user_pos, order_pos)?;
        self.queue.insert(Pair::new(train_pos, run), order_pos)?;
        tracing::debug!(train = %train.id, run, order_pos, "queued order");
        Ok("queue".to_string())
    }

    /// A logged-in user's orders, newest first.
    pub fn query_order(&mut self, users: &UserService, username: &UserName) -> ServiceResult<String> {
        let user_pos = users.session_pos(username)?;
        let positions = self.orders.find(&user_pos)?;

        let mut out = positions.len().to_string();
        for pos in positions.iter().rev() {
            let order = self.data.read(*pos)?;
            let _ = write!(out, "\n{order}");
        }
        Ok(out)
    }

    /// Refund a user's `nth` newest order (1 is the newest).
    ///
    /// Refunding a paid order frees its seats and then fills pending orders
    /// for the same run, oldest first, wherever the freed seats suffice.
    pub fn refund_ticket(
        &mut self,
        users: &UserService,
        trains: &mut TrainService,
        username: &UserName,
        nth: u32,
    ) -> ServiceResult<()> {
        let user_pos = users.session_pos(username)?;
        let positions = self.orders.find(&user_pos)?;
        let nth = nth as usize;
        if nth == 0 || nth > positions.len() {
            return Err(Rejection::UnknownOrder.into());
        }
        let order_pos = positions[positions.len() - nth];
        let order = self.data.read(order_pos)?;
        let queue_key = Pair::new(order.train_pos, order.run);

        match order.status {
            OrderStatus::Refunded => Err(Rejection::AlreadyRefunded.into()),
            OrderStatus::Pending => {
                self.data.write_prefix(order_pos, &OrderStatus::Refunded)?;
                self.queue.remove(&queue_key, &order_pos)?;
                Ok(())
            }
            OrderStatus::Success => {
                self.data.write_prefix(order_pos, &OrderStatus::Refunded)?;
                let train = trains.read(order.train_pos)?;
                let mut row = trains.seat_row(&train, order.run)?;
                row.release(order.from as usize, order.to as usize, order.amount);

                for pending_pos in self.queue.find(&queue_key)? {
                    let pending = self.data.read(pending_pos)?;
                    let (from, to) = (pending.from as usize, pending.to as usize);
                    if row.available(from, to) < pending.amount {
                        continue;
                    }
                    row.reserve(from, to, pending.amount);
                    self.data.write_prefix(pending_pos, &OrderStatus::Success)?;
                    self.queue.remove(&queue_key, &pending_pos)?;
                    tracing::debug!(train = %train.id, run = order.run, order_pos = pending_pos, "filled queued order");
                }

                trains.write_seat_row(&train, order.run, &row)?;
                Ok(())
            }
        }
    }

    pub fn clear(&mut self) -> ServiceResult<()> {
        self.orders.clear()?;
        self.queue.clear()?;
        self.data.clear()?;
        Ok(())
    }

    pub fn flush(&mut self) -> ServiceResult<()> {
        self.orders.flush()?;
        self.queue.flush()?;
        self.data.flush()?;
        Ok(())
    }
}
