//! Embedded browser demo page.
//!
//! A minimal client for manual testing: captures the microphone at 16 kHz,
//! streams raw PCM frames over the relay WebSocket, and plays whatever audio
//! comes back at 24 kHz. Playback substitutes a short silent buffer whenever
//! the queue runs dry so the output stream never gaps audibly.

use actix_web::HttpResponse;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Speech Translation Relay</title>
</head>
<body>
    <h1>Speech Translation Relay</h1>
    <label>Speak:
        <select id="speak">
            <option value="en-US">English</option>
            <option value="es-ES">Spanish</option>
            <option value="hi-IN">Hindi</option>
        </select>
    </label>
    <label>Listen:
        <select id="listen">
            <option value="es-ES">Spanish</option>
            <option value="en-US">English</option>
            <option value="hi-IN">Hindi</option>
        </select>
    </label>
    <button onclick="startStream()">Start Stream</button>
    <button onclick="stopStream()">Stop Stream</button>
    <script>
        var ws;
        var captureContext;
        var playbackContext;
        var processor;
        var input;
        var globalStream;
        var audioBufferQueue = [];
        var playing = false;

        function startStream() {
            var speak = document.getElementById("speak").value;
            var listen = document.getElementById("listen").value;
            var scheme = location.protocol === "https:" ? "wss" : "ws";
            ws = new WebSocket(scheme + "://" + location.host + "/ws?speak=" + speak + "&listen=" + listen);
            ws.binaryType = 'arraybuffer';
            ws.onopen = function(event) {
                console.log("WebSocket is open now.");
            };

            ws.onmessage = function(event) {
                if (typeof event.data === 'string') {
                    console.log("Message from server:", event.data);
                } else {
                    audioBufferQueue.push(event.data);
                    if (!playing) {
                        playAudio();
                        playing = true;
                    }
                }
            };

            ws.onclose = function(event) {
                console.log("WebSocket is closed now.", event.reason);
            };

            playbackContext = new (window.AudioContext || window.webkitAudioContext)({ sampleRate: 24000 });

            navigator.mediaDevices.getUserMedia({ audio: true })
                .then(function(stream) {
                    globalStream = stream;
                    captureContext = new (window.AudioContext || window.webkitAudioContext)({ sampleRate: 16000 });
                    processor = captureContext.createScriptProcessor(4096, 1, 1);
                    input = captureContext.createMediaStreamSource(stream);
                    input.connect(processor);
                    processor.connect(captureContext.destination);
                    processor.onaudioprocess = function(e) {
                        if (ws.readyState === WebSocket.OPEN) {
                            var inputBuffer = e.inputBuffer.getChannelData(0);
                            var outputBuffer = new Int16Array(inputBuffer.length);
                            for (var i = 0; i < inputBuffer.length; i++) {
                                outputBuffer[i] = Math.max(-1, Math.min(1, inputBuffer[i])) * 0x7FFF;
                            }
                            ws.send(outputBuffer.buffer);
                        }
                    };
                })
                .catch(function(err) {
                    console.log("The following error occurred: " + err);
                });
        }

        function stopStream() {
            if (globalStream) {
                globalStream.getTracks().forEach(track => track.stop());
            }
            if (processor) {
                processor.disconnect();
            }
            if (input) {
                input.disconnect();
            }
            if (captureContext) {
                captureContext.close();
            }
            if (playbackContext) {
                playbackContext.close();
            }
            if (ws) {
                ws.close();
            }
            console.log("Stream stopped.");
        }

        function playAudio() {
            var audioData;
            if (audioBufferQueue.length === 0) {
                // Silent filler so playback never gaps audibly
                audioData = new ArrayBuffer(4000 * 2);
            } else {
                audioData = audioBufferQueue.shift();
            }
            var audioBuffer = playbackContext.createBuffer(1, audioData.byteLength / 2, 24000);
            var channelData = audioBuffer.getChannelData(0);

            var dataView = new DataView(audioData);
            for (var i = 0; i < channelData.length; i++) {
                channelData[i] = dataView.getInt16(i * 2, true) / 0x7FFF;
            }

            var source = playbackContext.createBufferSource();
            source.buffer = audioBuffer;
            source.connect(playbackContext.destination);
            source.onended = playAudio;
            source.start();
        }
    </script>
</body>
</html>
"#;

/// GET /
pub async fn index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}
