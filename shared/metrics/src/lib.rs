use std::error::Error;
use std::net::SocketAddr;
use std::sync::mpsc::sync_channel;
use std::thread::JoinHandle;

pub use prometheus_exporter::prometheus;

#[macro_export]
macro_rules! declare_counter_metric {
    ($name:ident, $metric:expr, $help:expr) => {
        lazy_static! {
            static ref $name: $crate::prometheus::Counter =
                $crate::prometheus::register_counter!($metric, $help)
                    .expect("metric registration failed");
        }
    };
}

#[macro_export]
macro_rules! declare_gauge_metric {
    ($name:ident, $metric:expr, $help:expr) => {
        lazy_static! {
            static ref $name: $crate::prometheus::Gauge =
                $crate::prometheus::register_gauge!($metric, $help)
                    .expect("metric registration failed");
        }
    };
}

#[macro_export]
macro_rules! counter_metric {
    ($name:ident) => {
        $name.inc();
    };
    ($name:ident, $by:expr) => {
        $name.inc_by($by as f64);
    };
}

#[macro_export]
macro_rules! gauge_metric {
    ($name:ident, $value:expr) => {
        $name.set($value as f64);
    };
}

pub struct MetricsServer {
    pub port: u16,
    pub thread: JoinHandle<()>,
}

pub fn start_serving() -> Result<MetricsServer, Box<dyn Error>> {
    let ip = "127.0.0.1".parse()?;
    const PORT: u16 = 9898;

    let (result_tx, result_rx) = sync_channel(1);
    let thread = std::thread::spawn(move || {
        let addr = SocketAddr::new(ip, PORT);
        let res = prometheus_exporter::start(addr);
        result_tx
            .send(res)
            .expect("failed to send result from thread")
    });

    match result_rx.recv()? {
        Ok(_) => Ok(MetricsServer { thread, port: PORT }),
        Err(err) => Err(err.into()),
    }
}
