use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};

pub(crate) fn serve_once(
    status_line: &'static str,
    content_type: &'static str,
    body: &'static [u8],
) -> anyhow::Result<(String, JoinHandle<String>)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let origin = format!("http://{}", listener.local_addr()?);
    let handle = thread::spawn(move || {
        let Ok((stream, _)) = listener.accept() else {
            return String::new();
        };
        let mut reader = BufReader::new(stream);
        let mut head = String::new();
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap_or(0) == 0 {
                break;
            }
            if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                content_length = value.trim().parse().unwrap_or(0);
            }
            let done = line == "\r\n";
            head.push_str(&line);
            if done {
                break;
            }
        }
        let mut body_buf = vec![0u8; content_length];
        let _ = reader.read_exact(&mut body_buf);
        head.push_str(&String::from_utf8_lossy(&body_buf));

        let mut stream = reader.into_inner();
        let header = format!(
            "{status_line}\r\nContent-Type: {content_type}\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let _ = stream.write_all(header.as_bytes());
        let _ = stream.write_all(body);
        let _ = stream.flush();
        head
    });
    Ok((origin, handle))
}

pub(crate) fn refused_origin() -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let origin = format!("http://{}", listener.local_addr()?);
    drop(listener);
    Ok(origin)
}
