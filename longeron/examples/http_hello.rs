//! Minimal HTTP server: `cargo run --example http_hello --features http`
//!
//! Serves "Hello, World!" on every path, then waits until interrupted.
//! Try it with `curl http://127.0.0.1:8080/`.

use longeron::http::{HttpCodec, HttpConfig, HttpFrame, HttpResponse, Status};
use longeron::{Acceptor, Connection, EngineOptions, EventLoopGroup, IoEventHandle};

struct Hello;

impl IoEventHandle<HttpFrame> for Hello {
    fn accept(
        &mut self,
        _conn: &mut Connection,
        frame: HttpFrame,
    ) -> longeron::Result<Option<HttpFrame>> {
        let Some(req) = frame.as_request() else {
            return Ok(None);
        };
        println!("{} {}", req.method, req.path);
        let resp = HttpResponse::new(Status::OK)
            .with_header("Content-Type", "text/plain")
            .with_body("Hello, World!");
        Ok(Some(HttpFrame::Response(resp)))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    longeron::dev_tracing::init_tracing();

    let group = EventLoopGroup::new(EngineOptions::default())?;
    let server = Acceptor::bind(
        &group,
        "127.0.0.1:8080".parse()?,
        || HttpCodec::server(HttpConfig::default()),
        || Hello,
    )?;
    println!("listening on http://{}", server.local_addr());

    loop {
        std::thread::park();
    }
}
