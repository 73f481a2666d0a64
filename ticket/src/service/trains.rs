//! Trains, their timetables and seat inventory.
//!
//! A train runs once per day in its sale range. Its record stores the
//! timetable relative to the day the train leaves its first station, so a
//! concrete run is identified by that start date. Remaining seats live in
//! `SeatData.dat`, one [`SeatRow`] per run, starting at the train's
//! `seat_base` position.
//!
//! Trains only become visible to ticket searches once released. Releasing
//! adds every stop to the station index as `station -> (train position, stop
//! number)`.

use std::fmt::Write as _;
use std::path::Path;

use crate::service::{Rejection, ServiceResult, open_tree};
use crate::storage::btree::BPlusTree;
use crate::storage::codec::{CodecError, FixedCodec, decode_count, decode_vec, encode_slice, read_i32, read_u32, write_i32, write_u32};
use crate::storage::RecordFile;
use crate::types::{Clock, Date, DateTime, Pair, StationName, TrainId};

/// Most stops a train can have.
pub const MAX_STATIONS: usize = 100;

/// Track segments between consecutive stops.
const SEGMENTS: usize = MAX_STATIONS - 1;

mod offsets {
    use super::MAX_STATIONS;

    // The release flag comes first so it can be flipped in place.
    pub const RELEASED: usize = 0;
    pub const ID: usize = 1;
    pub const KIND: usize = 25;
    pub const SEAT_COUNT: usize = 26;
    pub const STATION_COUNT: usize = 30;
    pub const SALE_START: usize = 34;
    pub const SALE_END: usize = 38;
    pub const SEAT_BASE: usize = 42;
    pub const STATIONS: usize = 46;
    pub const PRICES: usize = STATIONS + 48 * MAX_STATIONS;
    pub const ARRIVALS: usize = PRICES + 4 * MAX_STATIONS;
    pub const DEPARTURES: usize = ARRIVALS + 4 * MAX_STATIONS;
    pub const END: usize = DEPARTURES + 4 * MAX_STATIONS;
}

/// A stored train.
///
/// All per-stop vectors have one element per station. `prices[i]` is the
/// fare from the first station to station `i`. `arrivals[0]` and
/// `departures[n - 1]` carry no meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Train {
    pub released: bool,
    pub id: TrainId,
    /// Single-letter train category.
    pub kind: u8,
    pub seat_count: i32,
    pub stations: Vec<StationName>,
    pub prices: Vec<i32>,
    pub arrivals: Vec<Clock>,
    pub departures: Vec<Clock>,
    pub sale_start: Date,
    pub sale_end: Date,
    /// Position of the first run's seat row.
    pub seat_base: u32,
}

impl Train {
    #[must_use]
    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    /// Stop number of `station`, if the train calls there.
    #[must_use]
    pub fn stop_of(&self, station: &StationName) -> Option<usize> {
        self.stations.iter().position(|s| s == station)
    }

    /// Number of runs in the sale range.
    #[must_use]
    pub fn run_count(&self) -> u32 {
        u32::try_from(self.sale_end.days_since(self.sale_start) + 1).unwrap_or(0)
    }

    /// Start date of the run that leaves stop `stop` on `date`.
    #[must_use]
    pub fn start_for(&self, stop: usize, date: Date) -> Date {
        date.add_days(-self.departures[stop].days())
    }

    /// Offset of the run starting on `start` within the sale range.
    #[must_use]
    pub fn run_of(&self, start: Date) -> Option<u32> {
        if start < self.sale_start || start > self.sale_end {
            return None;
        }
        u32::try_from(start.days_since(self.sale_start)).ok()
    }

    /// Fare between two stops.
    #[must_use]
    pub fn fare(&self, from: usize, to: usize) -> i32 {
        self.prices[to] - self.prices[from]
    }
}

impl FixedCodec for Train {
    const WIDTH: usize = offsets::END;

    fn encode(&self, buf: &mut [u8]) {
        buf[..Self::WIDTH].fill(0);
        self.released.encode(&mut buf[offsets::RELEASED..]);
        self.id.encode(&mut buf[offsets::ID..]);
        buf[offsets::KIND] = self.kind;
        write_i32(buf, offsets::SEAT_COUNT, self.seat_count);
        write_i32(buf, offsets::STATION_COUNT, i32::try_from(self.stations.len()).unwrap_or(0));
        self.sale_start.encode(&mut buf[offsets::SALE_START..]);
        self.sale_end.encode(&mut buf[offsets::SALE_END..]);
        write_u32(buf, offsets::SEAT_BASE, self.seat_base);
        encode_slice(&self.stations, &mut buf[offsets::STATIONS..]);
        encode_slice(&self.prices, &mut buf[offsets::PRICES..]);
        encode_slice(&self.arrivals, &mut buf[offsets::ARRIVALS..]);
        encode_slice(&self.departures, &mut buf[offsets::DEPARTURES..]);
    }

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let count = decode_count(buf, offsets::STATION_COUNT, "station", MAX_STATIONS)?;
        Ok(Self {
            released: bool::decode(&buf[offsets::RELEASED..])?,
            id: TrainId::decode(&buf[offsets::ID..])?,
            kind: buf[offsets::KIND],
            seat_count: read_i32(buf, offsets::SEAT_COUNT),
            stations: decode_vec(&buf[offsets::STATIONS..], count)?,
            prices: decode_vec(&buf[offsets::PRICES..], count)?,
            arrivals: decode_vec(&buf[offsets::ARRIVALS..], count)?,
            departures: decode_vec(&buf[offsets::DEPARTURES..], count)?,
            sale_start: Date::decode(&buf[offsets::SALE_START..])?,
            sale_end: Date::decode(&buf[offsets::SALE_END..])?,
            seat_base: read_u32(buf, offsets::SEAT_BASE),
        })
    }
}

/// Remaining seats of one run, per segment. Segment `i` runs from stop `i`
/// to stop `i + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatRow(pub [i32; SEGMENTS]);

impl SeatRow {
    /// A row for a run with `seats` free on every segment.
    #[must_use]
    pub const fn full(seats: i32) -> Self {
        Self([seats; SEGMENTS])
    }

    /// Seats free on every segment from stop `from` to stop `to`.
    #[must_use]
    pub fn available(&self, from: usize, to: usize) -> i32 {
        self.0[from..to].iter().copied().min().unwrap_or(0)
    }

    pub fn reserve(&mut self, from: usize, to: usize, seats: i32) {
        for segment in &mut self.0[from..to] {
            *segment -= seats;
        }
    }

    pub fn release(&mut self, from: usize, to: usize, seats: i32) {
        for segment in &mut self.0[from..to] {
            *segment += seats;
        }
    }
}

impl FixedCodec for SeatRow {
    const WIDTH: usize = 4 * SEGMENTS;

    fn encode(&self, buf: &mut [u8]) {
        encode_slice(&self.0, buf);
    }

    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut row = [0; SEGMENTS];
        for (i, seats) in row.iter_mut().enumerate() {
            *seats = read_i32(buf, 4 * i);
        }
        Ok(Self(row))
    }
}

/// Request to add a train.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrain {
    pub id: TrainId,
    pub station_count: usize,
    pub seat_count: i32,
    pub stations: Vec<StationName>,
    /// Fare of each segment.
    pub prices: Vec<i32>,
    /// Departure time from the first station.
    pub start_time: Clock,
    /// Minutes spent on each segment.
    pub travel_times: Vec<i32>,
    /// Minutes spent at each intermediate stop.
    pub stopover_times: Vec<i32>,
    pub sale_start: Date,
    pub sale_end: Date,
    pub kind: u8,
}

impl NewTrain {
    /// Turn per-segment fares and times into the cumulative timetable.
    fn schedule(&self, seat_base: u32) -> Result<Train, Rejection> {
        let n = self.station_count;
        if !(2..=MAX_STATIONS).contains(&n)
            || self.stations.len() != n
            || self.prices.len() != n - 1
            || self.travel_times.len() != n - 1
            || self.stopover_times.len() != n - 2
            || self.sale_start > self.sale_end
            || self.seat_count < 0
        {
            return Err(Rejection::MalformedTrain);
        }

        let mut prices = Vec::with_capacity(n);
        prices.push(0);
        for fare in &self.prices {
            let last = prices.last().copied().unwrap_or(0);
            prices.push(last + fare);
        }

        let mut arrivals = vec![self.start_time; n];
        let mut departures = vec![self.start_time; n];
        for i in 1..n {
            arrivals[i] = departures[i - 1].plus(self.travel_times[i - 1]);
            departures[i] = if i < n - 1 {
                arrivals[i].plus(self.stopover_times[i - 1])
            } else {
                arrivals[i]
            };
        }

        Ok(Train {
            released: false,
            id: self.id,
            kind: self.kind,
            seat_count: self.seat_count,
            stations: self.stations.clone(),
            prices,
            arrivals,
            departures,
            sale_start: self.sale_start,
            sale_end: self.sale_end,
            seat_base,
        })
    }
}

/// Train storage, the station index and seat inventory.
pub struct TrainService {
    index: BPlusTree<TrainId, u32>,
    stations: BPlusTree<StationName, Pair<u32, u32>>,
    data: RecordFile<Train>,
    seats: RecordFile<SeatRow>,
}

impl TrainService {
    pub fn open(dir: &Path, order: Option<usize>) -> ServiceResult<Self> {
        Ok(Self {
            index: open_tree(dir, "TrainIndex.dat", order)?,
            stations: open_tree(dir, "StationIndex.dat", order)?,
            data: RecordFile::open(&dir.join("TrainData.dat"))?,
            seats: RecordFile::open(&dir.join("SeatData.dat"))?,
        })
    }

    /// Number of train records, deleted ones included.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.data.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn add_train(&mut self, request: &NewTrain) -> ServiceResult<()> {
        if self.lookup(&request.id)?.is_some() {
            return Err(Rejection::DuplicateTrain.into());
        }
        let train = request.schedule(self.seats.len())?;

        let row = SeatRow::full(train.seat_count);
        for _ in 0..train.run_count() {
            self.seats.push(&row)?;
        }
        let pos = self.data.push(&train)?;
        self.index.insert(train.id, pos)?;
        tracing::debug!(train = %train.id, pos, runs = train.run_count(), "added train");
        Ok(())
    }

    /// Remove an unreleased train from the index. Its records stay behind.
    pub fn delete_train(&mut self, id: &TrainId) -> ServiceResult<()> {
        let pos = self.lookup(id)?.ok_or(Rejection::UnknownTrain)?;
        if self.is_released(pos)? {
            return Err(Rejection::AlreadyReleased.into());
        }
        self.index.remove(id, &pos)?;
        Ok(())
    }

    pub fn release_train(&mut self, id: &TrainId) -> ServiceResult<()> {
        let pos = self.lookup(id)?.ok_or(Rejection::UnknownTrain)?;
        if self.is_released(pos)? {
            return Err(Rejection::AlreadyReleased.into());
        }
        self.data.write_prefix(pos, &true)?;

        let train = self.data.read(pos)?;
        for (stop, station) in (0u32..).zip(&train.stations) {
            self.stations.insert(*station, Pair::new(pos, stop))?;
        }
        tracing::debug!(train = %id, pos, "released train");
        Ok(())
    }

    /// Timetable of the run starting on `date`, one line per stop.
    pub fn query_train(&mut self, id: &TrainId, date: Date) -> ServiceResult<String> {
        let (_, train) = self.locate(id)?;
        let run = train.run_of(date).ok_or(Rejection::OutsideSaleRange)?;
        let row = self.seat_row(&train, run)?;

        let last = train.station_count() - 1;
        let mut out = format!("{} {}", train.id, char::from(train.kind));
        for stop in 0..=last {
            let arrival = if stop == 0 {
                "xx-xx xx:xx".to_string()
            } else {
                DateTime::new(date, train.arrivals[stop]).to_string()
            };
            let departure = if stop == last {
                "xx-xx xx:xx".to_string()
            } else {
                DateTime::new(date, train.departures[stop]).to_string()
            };
            let seats = if stop == last {
                "x".to_string()
            } else {
                row.0[stop].to_string()
            };
            let _ = write!(
                out,
                "\n{} {arrival} -> {departure} {} {seats}",
                train.stations[stop], train.prices[stop]
            );
        }
        Ok(out)
    }

    /// Position and record of an indexed train.
    pub fn locate(&mut self, id: &TrainId) -> ServiceResult<(u32, Train)> {
        let pos = self.lookup(id)?.ok_or(Rejection::UnknownTrain)?;
        Ok((pos, self.data.read(pos)?))
    }

    pub fn read(&mut self, pos: u32) -> ServiceResult<Train> {
        Ok(self.data.read(pos)?)
    }

    /// Every `(train position, stop number)` calling at `station`, ordered by
    /// train position.
    pub fn station_stops(&mut self, station: &StationName) -> ServiceResult<Vec<Pair<u32, u32>>> {
        Ok(self.stations.find(station)?)
    }

    pub fn seat_row(&mut self, train: &Train, run: u32) -> ServiceResult<SeatRow> {
        Ok(self.seats.read(train.seat_base + run)?)
    }

    pub fn write_seat_row(&mut self, train: &Train, run: u32, row: &SeatRow) -> ServiceResult<()> {
        Ok(self.seats.write(train.seat_base + run, row)?)
    }

    pub fn clear(&mut self) -> ServiceResult<()> {
        self.index.clear()?;
        self.stations.clear()?;
        self.data.clear()?;
        self.seats.clear()?;
        Ok(())
    }

    pub fn flush(&mut self) -> ServiceResult<()> {
        self.index.flush()?;
        self.stations.flush()?;
        self.data.flush()?;
        self.seats.flush()?;
        Ok(())
    }

    fn lookup(&mut self, id: &TrainId) -> ServiceResult<Option<u32>> {
        Ok(self.index.find(id)?.first().copied())
    }

    fn is_released(&mut self, pos: u32) -> ServiceResult<bool> {
        Ok(self.data.read_prefix::<bool>(pos)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::service::ServiceError;
    use tempfile::tempdir;

    /// Three stops, A 08:00 -> B 10:00/10:10 -> C 13:10, on sale 06-01..06-03.
    pub(crate) fn sample_train(id: &str) -> NewTrain {
        NewTrain {
            id: id.into(),
            station_count: 3,
            seat_count: 100,
            stations: vec!["A".into(), "B".into(), "C".into()],
            prices: vec![50, 70],
            start_time: "08:00".parse().expect("time"),
            travel_times: vec![120, 180],
            stopover_times: vec![10],
            sale_start: "06-01".parse().expect("date"),
            sale_end: "06-03".parse().expect("date"),
            kind: b'G',
        }
    }

    fn create_test_service() -> (tempfile::TempDir, TrainService) {
        let dir = tempdir().expect("create temp dir");
        let service = TrainService::open(dir.path(), Some(3)).expect("open");
        (dir, service)
    }

    fn date(s: &str) -> Date {
        s.parse().expect("date")
    }

    #[test]
    fn test_schedule() {
        let train = sample_train("G1").schedule(0).expect("schedule");
        assert_eq!(train.prices, vec![0, 50, 120]);
        assert_eq!(train.departures[0].to_string(), "08:00");
        assert_eq!(train.arrivals[1].to_string(), "10:00");
        assert_eq!(train.departures[1].to_string(), "10:10");
        assert_eq!(train.arrivals[2].to_string(), "13:10");
        assert_eq!(train.run_count(), 3);
        assert_eq!(train.fare(1, 2), 70);
    }

    #[test]
    fn test_schedule_rejects_inconsistent_lists() {
        let mut request = sample_train("G1");
        request.prices.pop();
        assert_eq!(request.schedule(0), Err(Rejection::MalformedTrain));

        let mut request = sample_train("G1");
        request.station_count = 1;
        assert_eq!(request.schedule(0), Err(Rejection::MalformedTrain));
    }

    #[test]
    fn test_overnight_runs() {
        let mut request = sample_train("Z1");
        request.start_time = "23:00".parse().expect("time");
        let train = request.schedule(0).expect("schedule");

        // Leaves B at 01:10 the next day.
        assert_eq!(train.departures[1].days(), 1);
        assert_eq!(train.start_for(1, date("06-02")), date("06-01"));
        assert_eq!(train.run_of(date("06-01")), Some(0));
        assert_eq!(train.run_of(date("06-04")), None);
    }

    #[test]
    fn test_train_record_roundtrip() {
        let train = sample_train("G1").schedule(7).expect("schedule");
        let mut buf = vec![0u8; Train::WIDTH];
        train.encode(&mut buf);
        assert_eq!(Train::decode(&buf).expect("decode"), train);
    }

    #[test]
    fn test_seat_row() {
        let mut row = SeatRow::full(10);
        row.reserve(0, 2, 4);
        row.reserve(1, 3, 3);
        assert_eq!(row.available(0, 1), 6);
        assert_eq!(row.available(0, 3), 3);
        row.release(1, 2, 3);
        assert_eq!(row.available(1, 2), 6);
    }

    #[test]
    fn test_add_and_delete() {
        let (_dir, mut trains) = create_test_service();
        trains.add_train(&sample_train("G1")).expect("add");
        assert!(matches!(
            trains.add_train(&sample_train("G1")),
            Err(ServiceError::Rejected(Rejection::DuplicateTrain))
        ));

        trains.delete_train(&"G1".into()).expect("delete");
        assert!(matches!(
            trains.locate(&"G1".into()),
            Err(ServiceError::Rejected(Rejection::UnknownTrain))
        ));

        // The id is free again.
        trains.add_train(&sample_train("G1")).expect("re-add");
        assert_eq!(trains.len(), 2);
    }

    #[test]
    fn test_release() {
        let (_dir, mut trains) = create_test_service();
        trains.add_train(&sample_train("G1")).expect("add");
        trains.add_train(&sample_train("G2")).expect("add");
        trains.release_train(&"G2".into()).expect("release");

        assert!(matches!(
            trains.release_train(&"G2".into()),
            Err(ServiceError::Rejected(Rejection::AlreadyReleased))
        ));
        assert!(matches!(
            trains.delete_train(&"G2".into()),
            Err(ServiceError::Rejected(Rejection::AlreadyReleased))
        ));

        let (pos, train) = trains.locate(&"G2".into()).expect("locate");
        assert!(train.released);
        assert_eq!(
            trains.station_stops(&"B".into()).expect("stops"),
            vec![Pair::new(pos, 1)]
        );
    }

    #[test]
    fn test_query_train() {
        let (_dir, mut trains) = create_test_service();
        trains.add_train(&sample_train("G1")).expect("add");

        let out = trains.query_train(&"G1".into(), date("06-02")).expect("query");
        assert_eq!(
            out,
            "G1 G\n\
             A xx-xx xx:xx -> 06-02 08:00 0 100\n\
             B 06-02 10:00 -> 06-02 10:10 50 100\n\
             C 06-02 13:10 -> xx-xx xx:xx 120 x"
        );

        assert!(matches!(
            trains.query_train(&"G1".into(), date("06-04")),
            Err(ServiceError::Rejected(Rejection::OutsideSaleRange))
        ));
    }

    #[test]
    fn test_seat_rows_are_per_run() {
        let (_dir, mut trains) = create_test_service();
        trains.add_train(&sample_train("G1")).expect("add");
        trains.add_train(&sample_train("G2")).expect("add");
        let (_, second) = trains.locate(&"G2".into()).expect("locate");
        assert_eq!(second.seat_base, 3);

        let mut row = trains.seat_row(&second, 1).expect("row");
        row.reserve(0, 2, 30);
        trains.write_seat_row(&second, 1, &row).expect("write row");

        assert_eq!(trains.seat_row(&second, 1).expect("row").available(0, 2), 70);
        assert_eq!(trains.seat_row(&second, 0).expect("row").available(0, 2), 100);
    }
}
